//! Built-in steps

mod random_secret;
mod ready_status;
mod template;

pub use random_secret::{RandomSecretStep, GENERATED_REASON};
pub use ready_status::{Requirement, ReadyStatusStep, READY_CONDITION, REASON_NOT_READY, REASON_READY};
pub use template::{
    TemplateStep, REASON_APPLIED, REASON_DOES_NOT_EXIST, REASON_NOT_OWNED, REASON_UPSTREAM_NOT_SET,
    REASON_UPSTREAM_SET,
};
