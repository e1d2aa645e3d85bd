//! Candidate spend records
//!
//! A [`CandidateRecord`] is what the extractor produces from one message, or
//! from a message plus its clarification replies. It is only appended to the
//! ledger once [`CandidateRecord::is_complete`] holds.

use crate::field::FieldValue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spend category (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Lab consumables (gloves, tips, tubes, ...)
    Consumables,
    /// Equipment (pumps, meters, power supplies, ...)
    Equipment,
    /// Chemicals and gases (solvents, cylinders, refills, ...)
    ChemicalsAndGases,
}

impl Category {
    /// All categories, in lookup order
    pub const ALL: [Category; 3] = [
        Category::Consumables,
        Category::Equipment,
        Category::ChemicalsAndGases,
    ];

    /// Label written to the ledger
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Category::Consumables => "Lab consumables",
            Category::Equipment => "Equipment",
            Category::ChemicalsAndGases => "Chemicals & gases",
        }
    }

    /// Parse either the enum name or the ledger label
    #[must_use]
    pub fn from_label(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|c| {
            c.label().eq_ignore_ascii_case(s) || format!("{c:?}").eq_ignore_ascii_case(s)
        })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The five fields a record needs before it can be appended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    /// What was bought
    Item,
    /// Total price
    Amount,
    /// Currency of the amount
    Currency,
    /// Spend category
    Category,
    /// Project the spend is billed to
    ProjectCode,
}

impl RequiredField {
    /// All required fields, in question order
    pub const ALL: [RequiredField; 5] = [
        RequiredField::Item,
        RequiredField::Amount,
        RequiredField::Currency,
        RequiredField::Category,
        RequiredField::ProjectCode,
    ];

    /// Field name as shown to users
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            RequiredField::Item => "item",
            RequiredField::Amount => "amount",
            RequiredField::Currency => "currency",
            RequiredField::Category => "category",
            RequiredField::ProjectCode => "project_code",
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured, confidence-scored extraction result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// What was bought
    pub item: FieldValue<String>,
    /// Total price, verbatim
    pub amount: FieldValue<Decimal>,
    /// Currency code (or symbol when no mapping is configured)
    pub currency: FieldValue<String>,
    /// Spend category
    pub category: FieldValue<Category>,
    /// Canonical project code from the closed set
    pub project_code: FieldValue<String>,
    /// Number of units, when stated
    pub quantity: FieldValue<u32>,
    /// Vendor, when stated
    pub vendor: FieldValue<String>,
    /// Free-form notes, when stated
    pub notes: FieldValue<String>,
    /// Two or more project codes matched and none was picked
    pub ambiguous_project_code: bool,
    /// Text this record was extracted from
    pub source_text: String,
}

impl CandidateRecord {
    /// All-absent record for `source_text`
    #[inline]
    #[must_use]
    pub fn empty(source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            ..Self::default()
        }
    }

    /// Required fields that are absent or below `min_confidence`
    #[must_use]
    pub fn missing_fields(&self, min_confidence: f64) -> Vec<RequiredField> {
        RequiredField::ALL
            .into_iter()
            .filter(|field| !self.field_confident(*field, min_confidence))
            .collect()
    }

    /// Whether every required field is present with at least `min_confidence`
    #[inline]
    #[must_use]
    pub fn is_complete(&self, min_confidence: f64) -> bool {
        RequiredField::ALL
            .into_iter()
            .all(|field| self.field_confident(field, min_confidence))
    }

    fn field_confident(&self, field: RequiredField, min_confidence: f64) -> bool {
        match field {
            RequiredField::Item => self.item.is_confident(min_confidence),
            RequiredField::Amount => self.amount.is_confident(min_confidence),
            RequiredField::Currency => self.currency.is_confident(min_confidence),
            RequiredField::Category => self.category.is_confident(min_confidence),
            RequiredField::ProjectCode => self.project_code.is_confident(min_confidence),
        }
    }

    /// Lowest confidence across the required fields
    #[must_use]
    pub fn confidence(&self) -> f64 {
        [
            self.item.confidence,
            self.amount.confidence,
            self.currency.confidence,
            self.category.confidence,
            self.project_code.confidence,
        ]
        .into_iter()
        .fold(1.0, f64::min)
    }

    /// Human-readable summary, available once the required values exist
    #[must_use]
    pub fn summary(&self) -> Option<Summary> {
        Some(Summary {
            item: self.item.get()?.clone(),
            amount: *self.amount.get()?,
            currency: self.currency.get()?.clone(),
            project_code: self.project_code.get().cloned(),
        })
    }
}

/// Short description of a logged purchase, stored for "already logged" replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Item text
    pub item: String,
    /// Amount
    pub amount: Decimal,
    /// Currency
    pub currency: String,
    /// Project code, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_code: Option<String>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {} {}", self.item, self.amount, self.currency)?;
        if let Some(project) = &self.project_code {
            write!(f, ", project {project}")?;
        }
        Ok(())
    }
}
