//! Fieldgate driver for DDS domains.
//!
//! Samples of subscribed DDS topics are decoded to JSON and published as
//!
//! ```text
//! fieldgate/dds/<id>/values/<topic>
//! ```
//!
//! Topic addresses are `<type id>/<topic name>`, where the type id is one of the
//! configured `topic_types`. Values published to a topic are encoded with the
//! type support of its type and written to the domain.

pub mod config;
pub mod domain;
pub mod driver;
pub mod types;

pub use config::{DdsBridgeConfig, DdsConfig, TopicTypeConfig};
pub use domain::{DdsParticipant, DdsParticipantFactory, LoopbackDomain, Sample, TopicAddress};
pub use driver::DdsDriver;
pub use types::{JsonTypeSupport, Shape, ShapeTypeSupport, TypeError, TypeRegistry, TypeSupport};
