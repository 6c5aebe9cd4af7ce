//! Domain models for the punch-list pipeline
//!
//! Every status column is a closed set of strings in the database; the
//! enums here are the typed view of those columns.

/// Declare a string-backed enum persisted as TEXT
///
/// Generates serde renames, `as_str`, `Display` and `FromStr` from a single
/// variant → text table so the three can never drift apart.
macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:tt ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = rav_common::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(rav_common::Error::InvalidInput(format!(
                        concat!("Unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod contractor;
pub mod pipeline;
pub mod project;
pub mod punch_list;
pub mod voice_message;

pub use contractor::{Availability, Contractor, NewContractor, PriceRange};
pub use pipeline::{JobKind, JobStatus, PipelineAction, PipelineJob, TriggerSource};
pub use project::{NewProject, Project};
pub use punch_list::{
    AssignmentMethod, ContractorResponse, DeliveryStatus, ItemStatus, NewAssignment,
    NewPunchListItem, Priority, PunchListAssignment, PunchListItem,
};
pub use voice_message::{
    ExtractionRunStatus, NewVoiceMessage, VoiceMessage, VoiceMessageStatus, VoiceTranscription,
};
