//! Declarative command schemas and request validation.
//!
//! Each driver registers a [`CommandTable`] mapping every command it supports
//! to its [`ParameterSpec`]s and [`ReturnSpec`]s. The dispatcher validates a
//! request against that table before the driver sees it, so a rejected
//! request has no side effects.
//!
//! # Example
//!
//! ```rust
//! use perimon::schema::{CommandTable, EnumKind, ParameterSpec, ReturnSpec};
//! use perimon::types::Command;
//! use serde_json::json;
//!
//! let table = CommandTable::builder("Demo")
//!     .command(
//!         Command::Present,
//!         vec![
//!             ParameterSpec::number("x", -90.0, 90.0),
//!             ParameterSpec::symbol("eye", EnumKind::Eye).or_default(json!("LEFT")),
//!         ],
//!         vec![ReturnSpec::new("seen", "observer responded")],
//!     )
//!     .build()?;
//!
//! let request = json!({"x": 10, "eye": "right"});
//! let args = table.validate(Command::Present, request.as_object().unwrap())?;
//! assert_eq!(args.text("eye")?, "RIGHT");
//! # Ok::<(), perimon::MonitorError>(())
//! ```

mod enums;
mod spec;
mod validate;

pub use enums::EnumKind;
pub use spec::{
    CommandSchema, CommandTable, CommandTableBuilder, ElementType, ParameterSpec, ReturnSpec, ValueKind,
};
pub use validate::{Arguments, RANGE_TOLERANCE, validate};
pub(crate) use validate::json_kind;
