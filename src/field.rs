//! The tri-state field used by every extracted record.
//!
//! Model output is untrusted. A value that could not be read is not the same
//! thing as a value of zero, and neither is the same as a value that simply
//! was not reported. [`Field`] keeps the three apart so no field is ever
//! silently absent:
//!
//! | State | JSON | Meaning |
//! |-------|------|---------|
//! | `Value(v)` | `8.0` / `"PVC"` | read and typed |
//! | `Uncertain { reason }` | `{"uncertain": "Not visible"}` | flagged by the model (or unparseable) |
//! | `Absent` | `null` | not reported at all |

use serde::{Deserialize, Serialize};
use std::fmt;

/// One record field: a typed value, an explicit uncertainty, or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field<T> {
    /// A well-typed value.
    Value(T),
    /// Explicitly marked uncertain, with the reason as written.
    Uncertain {
        #[serde(rename = "uncertain")]
        reason: String,
    },
    /// Not reported.
    Absent,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Absent
    }
}

impl<T> Field<T> {
    pub fn uncertain(reason: impl Into<String>) -> Self {
        Field::Uncertain {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Field::Uncertain { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Field::Value(_))
    }

    pub fn is_uncertain(&self) -> bool {
        matches!(self, Field::Uncertain { .. })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent)
    }

    /// Stated fields (value or uncertain) take part in reconciliation;
    /// absent ones only fill gaps.
    pub fn is_stated(&self) -> bool {
        !self.is_absent()
    }

    /// 2 for a value, 1 for uncertain, 0 for absent.
    pub fn certainty_rank(&self) -> u8 {
        match self {
            Field::Value(_) => 2,
            Field::Uncertain { .. } => 1,
            Field::Absent => 0,
        }
    }

    pub fn as_ref(&self) -> Field<&T> {
        match self {
            Field::Value(v) => Field::Value(v),
            Field::Uncertain { reason } => Field::Uncertain {
                reason: reason.clone(),
            },
            Field::Absent => Field::Absent,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Field::Value(v) => Field::Value(f(v)),
            Field::Uncertain { reason } => Field::Uncertain { reason },
            Field::Absent => Field::Absent,
        }
    }

    /// Keep `self` unless it is absent, in which case take `other`.
    pub fn or(self, other: Field<T>) -> Field<T> {
        if self.is_absent() {
            other
        } else {
            self
        }
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Value(v) => write!(f, "{v}"),
            Field::Uncertain { reason } => write!(f, "UNCERTAIN: {reason}"),
            Field::Absent => f.write_str("—"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shapes() {
        let v: Field<f64> = Field::Value(8.0);
        let u: Field<f64> = Field::uncertain("Not visible");
        let a: Field<f64> = Field::Absent;
        assert_eq!(serde_json::to_string(&v).unwrap(), "8.0");
        assert_eq!(
            serde_json::to_string(&u).unwrap(),
            r#"{"uncertain":"Not visible"}"#
        );
        assert_eq!(serde_json::to_string(&a).unwrap(), "null");
    }

    #[test]
    fn json_round_trip_each_state() {
        for f in [
            Field::Value("MH-SS-1".to_string()),
            Field::uncertain("obscured by hatch"),
            Field::Absent,
        ] {
            let json = serde_json::to_string(&f).unwrap();
            let back: Field<String> = serde_json::from_str(&json).unwrap();
            assert_eq!(back, f);
        }
    }

    #[test]
    fn certainty_ordering() {
        assert!(Field::Value(1).certainty_rank() > Field::<i32>::uncertain("x").certainty_rank());
        assert!(Field::<i32>::uncertain("x").certainty_rank() > Field::<i32>::Absent.certainty_rank());
    }

    #[test]
    fn display_states() {
        assert_eq!(Field::Value(3.5).to_string(), "3.5");
        assert_eq!(Field::<f64>::uncertain("Not visible").to_string(), "UNCERTAIN: Not visible");
        assert_eq!(Field::<f64>::Absent.to_string(), "—");
    }

    #[test]
    fn or_fills_only_absent() {
        let a: Field<i32> = Field::Absent;
        assert_eq!(a.or(Field::Value(2)), Field::Value(2));
        let u: Field<i32> = Field::uncertain("x");
        assert_eq!(u.clone().or(Field::Value(2)), u);
    }
}
