//! Representative ICS form schemas
//!
//! These stand in for an authoritative catalog: field ids follow the paper
//! forms, short codes are two-letter mnemonics chosen for voice relay.

use super::catalog::SchemaCatalog;
use super::descriptor::{CrossFieldRule, FieldDescriptor, FormSchema, Moment, SemanticType};
use super::SchemaError;
use crate::fields::FieldValue;

pub const ICS_213: &str = "ICS-213";
pub const ICS_214: &str = "ICS-214";
pub const ICS_205: &str = "ICS-205";
pub const ICS_202: &str = "ICS-202";

pub(super) fn standard_catalog() -> Result<SchemaCatalog, SchemaError> {
    Ok(SchemaCatalog::builder()
        .register(general_message())?
        .register(activity_log())?
        .register(radio_plan())?
        .register(incident_objectives())?
        .build())
}

/// ICS-213 General Message
pub fn general_message() -> FormSchema {
    FormSchema::new(ICS_213, "213")
        .titled("General Message")
        .field(FieldDescriptor::text("incident_name", "IN"))
        .field(FieldDescriptor::text("to", "TO").required())
        .field(FieldDescriptor::text("to_position", "TP"))
        .field(FieldDescriptor::text("from", "FR").required())
        .field(FieldDescriptor::text("from_position", "FP"))
        .field(FieldDescriptor::text("subject", "SU").required().max_len(120))
        .field(FieldDescriptor::new("date", "DT", SemanticType::Date))
        .field(FieldDescriptor::new("time", "TM", SemanticType::Time))
        .field(
            FieldDescriptor::new(
                "priority",
                "PR",
                SemanticType::enumeration(["ROUTINE", "PRIORITY", "IMMEDIATE"]),
            )
            .with_default(FieldValue::enum_tag("ROUTINE")),
        )
        .field(FieldDescriptor::text("message", "MS"))
        .field(FieldDescriptor::text("approved_by", "AP"))
        .field(FieldDescriptor::text("reply", "RE"))
        .field(FieldDescriptor::text("replied_by", "RB"))
        .field(FieldDescriptor::new("reply_datetime", "RD", SemanticType::DateTime))
        .rule(CrossFieldRule::RequiredWith {
            field: "replied_by".into(),
            trigger: "reply".into(),
        })
}

/// ICS-214 Activity Log
pub fn activity_log() -> FormSchema {
    FormSchema::new(ICS_214, "214")
        .titled("Activity Log")
        .field(FieldDescriptor::text("incident_name", "IN").required())
        .field(FieldDescriptor::new("op_start_date", "SD", SemanticType::Date))
        .field(FieldDescriptor::new("op_start_time", "ST", SemanticType::Time))
        .field(FieldDescriptor::new("op_end_date", "ED", SemanticType::Date))
        .field(FieldDescriptor::new("op_end_time", "ET", SemanticType::Time))
        .field(FieldDescriptor::text("name", "NM").required())
        .field(FieldDescriptor::text("ics_position", "PO"))
        .field(FieldDescriptor::text("home_agency", "HA"))
        .field(FieldDescriptor::new("resources", "RS", SemanticType::Group))
        .field(FieldDescriptor::text("resource_name", "RN").in_group("resources").required())
        .field(FieldDescriptor::text("resource_position", "RP").in_group("resources"))
        .field(FieldDescriptor::text("resource_agency", "RA").in_group("resources"))
        .field(FieldDescriptor::new("activities", "AC", SemanticType::Group).required())
        .field(
            FieldDescriptor::new("activity_time", "AT", SemanticType::DateTime)
                .in_group("activities")
                .required(),
        )
        .field(
            FieldDescriptor::text("activity_note", "AN")
                .in_group("activities")
                .required()
                .max_len(500),
        )
        .field(FieldDescriptor::text("prepared_by", "PB"))
        .rule(CrossFieldRule::NotBefore {
            start: Moment::DateAndTime {
                date: "op_start_date".into(),
                time: "op_start_time".into(),
            },
            end: Moment::DateAndTime {
                date: "op_end_date".into(),
                time: "op_end_time".into(),
            },
        })
        .rule(CrossFieldRule::MinRows {
            group: "activities".into(),
            min: 1,
        })
}

/// ICS-205 Incident Radio Communications Plan
pub fn radio_plan() -> FormSchema {
    FormSchema::new(ICS_205, "205")
        .titled("Incident Radio Communications Plan")
        .field(FieldDescriptor::text("incident_name", "IN").required())
        .field(FieldDescriptor::new("date_prepared", "DP", SemanticType::DateTime))
        .field(FieldDescriptor::new("op_from", "OF", SemanticType::DateTime))
        .field(FieldDescriptor::new("op_to", "OT", SemanticType::DateTime))
        .field(FieldDescriptor::new("channels", "CH", SemanticType::Group))
        .field(FieldDescriptor::text("zone", "ZG").in_group("channels"))
        .field(
            FieldDescriptor::new("channel_number", "CN", SemanticType::Number)
                .in_group("channels")
                .required()
                .range(1.0, 999.0),
        )
        .field(FieldDescriptor::text("function", "FN").in_group("channels").required())
        .field(FieldDescriptor::text("channel_name", "CM").in_group("channels"))
        .field(
            FieldDescriptor::new("rx_freq", "RF", SemanticType::Number)
                .in_group("channels")
                .range(0.0, 3000.0),
        )
        .field(
            FieldDescriptor::new("tx_freq", "TF", SemanticType::Number)
                .in_group("channels")
                .range(0.0, 3000.0),
        )
        .field(
            FieldDescriptor::new("mode", "MD", SemanticType::enumeration(["A", "D", "M"]))
                .in_group("channels"),
        )
        .field(FieldDescriptor::text("remarks", "RM").in_group("channels"))
        .field(FieldDescriptor::text("special_instructions", "SI"))
        .field(FieldDescriptor::text("prepared_by", "PB"))
        .rule(CrossFieldRule::NotBefore {
            start: Moment::DateTime("op_from".into()),
            end: Moment::DateTime("op_to".into()),
        })
        .rule(CrossFieldRule::MinRows {
            group: "channels".into(),
            min: 1,
        })
}

/// ICS-202 Incident Objectives
pub fn incident_objectives() -> FormSchema {
    FormSchema::new(ICS_202, "202")
        .titled("Incident Objectives")
        .field(FieldDescriptor::text("incident_name", "IN").required())
        .field(FieldDescriptor::new("op_from", "OF", SemanticType::DateTime))
        .field(FieldDescriptor::new("op_to", "OT", SemanticType::DateTime))
        .field(FieldDescriptor::text("objectives", "OB").required())
        .field(FieldDescriptor::text("command_emphasis", "CE"))
        .field(FieldDescriptor::text("situational_awareness", "SA"))
        .field(FieldDescriptor::new(
            "safety_plan_required",
            "SP",
            SemanticType::Boolean,
        ))
        .field(FieldDescriptor::text("safety_plan_location", "SL"))
        .field(FieldDescriptor::text("prepared_by", "PB"))
        .rule(CrossFieldRule::NotBefore {
            start: Moment::DateTime("op_from".into()),
            end: Moment::DateTime("op_to".into()),
        })
        .rule(CrossFieldRule::RequiredWith {
            field: "safety_plan_location".into(),
            trigger: "safety_plan_required".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_seals() {
        let catalog = SchemaCatalog::standard().unwrap();
        assert_eq!(catalog.len(), 4);
        for form_type in [ICS_213, ICS_214, ICS_205, ICS_202] {
            assert!(catalog.contains(form_type), "{} missing", form_type);
        }
        assert_eq!(catalog.by_type_code("205").unwrap().form_type(), ICS_205);
    }

    #[test]
    fn test_group_columns_follow_their_group() {
        let catalog = SchemaCatalog::standard().unwrap();
        let schema = catalog.lookup(ICS_205).unwrap();
        let columns: Vec<_> = schema
            .columns("channels")
            .map(|c| c.short_code.as_str())
            .collect();
        assert_eq!(columns, vec!["ZG", "CN", "FN", "CM", "RF", "TF", "MD", "RM"]);
    }
}
