use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::state::session::RoutineSeed;

/// Ordered routine list for one competition day, supplied by the
/// routine-ordering collaborator (the management platform).
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RoutineListInput {
    /// Day the list covers (`YYYY-MM-DD`); defaults to today when omitted.
    #[serde(default)]
    pub competition_day: Option<String>,
    /// Routines in running order.
    #[validate(
        length(min = 1, message = "a competition day needs at least one routine"),
        nested
    )]
    pub routines: Vec<RoutineInput>,
}

/// One routine entry of the ingested list.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct RoutineInput {
    /// Stable identifier from the management platform; generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Display title of the entry.
    #[validate(length(min = 1, message = "routine title must not be empty"))]
    pub title: String,
    /// Studio that fields the entry.
    #[validate(length(min = 1, message = "studio name must not be empty"))]
    pub studio_name: String,
    /// Expected performance length.
    #[validate(range(min = 1, message = "routine duration must be strictly positive"))]
    pub duration_ms: u64,
}

impl From<RoutineInput> for RoutineSeed {
    fn from(input: RoutineInput) -> Self {
        Self {
            id: input.id.unwrap_or_else(Uuid::new_v4),
            title: input.title,
            studio_name: input.studio_name,
            duration_ms: input.duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_routine_list_fails_validation() {
        let input: RoutineListInput = serde_json::from_str(r#"{"routines":[]}"#).unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn zero_duration_fails_validation() {
        let input: RoutineListInput = serde_json::from_str(
            r#"{"routines":[{"title":"Opening","studio_name":"Starlight","duration_ms":0}]}"#,
        )
        .unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn missing_id_gets_generated() {
        let input: RoutineInput = serde_json::from_str(
            r#"{"title":"Opening","studio_name":"Starlight","duration_ms":180000}"#,
        )
        .unwrap();
        let seed: RoutineSeed = input.into();
        assert!(!seed.id.is_nil());
    }
}
