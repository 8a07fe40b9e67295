//! Goods categories.

use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six goods classes of the survey extract.
///
/// The numeric code is carried in the column names: `s<code>` holds the
/// expenditure level and `p<code>` the log price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Food purchased from stores (code 1)
    FoodAtHome,
    /// Food purchased from restaurants (code 2)
    FoodOut,
    /// Clothing (code 6)
    Clothing,
    /// Recreation (code 8)
    Recreation,
    /// Private and public transportation (code 17)
    Transport,
    /// Rent and household energy (code 19)
    RentEnergy,
}

impl Category {
    /// All categories in code order.
    pub const ALL: [Self; 6] = [
        Self::FoodAtHome,
        Self::FoodOut,
        Self::Clothing,
        Self::Recreation,
        Self::Transport,
        Self::RentEnergy,
    ];

    /// Numeric survey code
    pub const fn code(self) -> u16 {
        match self {
            Self::FoodAtHome => 1,
            Self::FoodOut => 2,
            Self::Clothing => 6,
            Self::Recreation => 8,
            Self::Transport => 17,
            Self::RentEnergy => 19,
        }
    }

    /// Category for a survey code
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Short label used in tables
    pub const fn label(self) -> &'static str {
        match self {
            Self::FoodAtHome => "food-in",
            Self::FoodOut => "food-out",
            Self::Clothing => "clothing",
            Self::Recreation => "recreation",
            Self::Transport => "transport",
            Self::RentEnergy => "rent-energy",
        }
    }

    /// Name of the expenditure column, e.g. `s17`
    pub fn expenditure_column(self) -> String {
        format!("s{}", self.code())
    }

    /// Name of the log-price column, e.g. `p17`
    pub fn price_column(self) -> String {
        format!("p{}", self.code())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which categories are shareable, and their order.
///
/// The order of `shareable` is the equation order everywhere downstream and
/// is never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySet {
    /// Shareable goods, one demand equation each
    pub shareable: Vec<Category>,
    /// The good whose Barten scale is normalised to one
    pub nonshareable: Category,
}

impl Default for CategorySet {
    fn default() -> Self {
        Self {
            shareable: vec![
                Category::FoodAtHome,
                Category::FoodOut,
                Category::Recreation,
                Category::Transport,
                Category::RentEnergy,
            ],
            nonshareable: Category::Clothing,
        }
    }
}

impl CategorySet {
    /// Shareable goods followed by the nonshareable good
    pub fn all(&self) -> Vec<Category> {
        let mut all = self.shareable.clone();
        all.push(self.nonshareable);
        all
    }

    /// Number of shareable goods
    pub fn n_shareable(&self) -> usize {
        self.shareable.len()
    }

    /// Position of the nonshareable good in [`CategorySet::all`]
    pub fn nonshareable_index(&self) -> usize {
        self.shareable.len()
    }

    /// Check that the set is usable.
    pub fn validate(&self) -> Result<()> {
        if self.shareable.is_empty() {
            return Err(DataError::InvalidConfig(
                "at least one shareable category is required".to_string(),
            ));
        }
        if self.shareable.contains(&self.nonshareable) {
            return Err(DataError::InvalidConfig(format!(
                "category {} cannot be both shareable and nonshareable",
                self.nonshareable
            )));
        }
        for (i, c) in self.shareable.iter().enumerate() {
            if self.shareable[..i].contains(c) {
                return Err(DataError::InvalidConfig(format!(
                    "category {c} listed twice"
                )));
            }
        }
        Ok(())
    }
}
