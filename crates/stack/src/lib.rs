//! Compose-style service model and its translation into cluster resources.
//!
//! A [`Stack`] is parsed from one or more compose files, validated, and then
//! handed to the [`Translator`], which dispatches every service to a
//! [`ServiceKind`] from the [`KindRegistry`] and returns a deterministic
//! [`TranslatedResourceSet`].

#[macro_use]
pub mod id_enum_macro;

pub mod compose;
pub mod error;
pub mod kind;
pub mod labels;
pub mod model;
pub mod network;
pub mod resource;
pub mod routing;
pub mod translate;
pub mod validate;
pub mod volume;

pub use compose::{load_stack, parse_compose};
pub use error::StackError;
pub use kind::{KindId, KindRegistry, ServiceKind};
pub use model::{
    DependsOnCondition, EndpointMode, Healthcheck, MountSource, NamedVolume, PortMapping,
    Protocol, RestartPolicy, ServiceDeclaration, ServiceDependency, Stack, VolumeMount,
};
pub use resource::{ObjectMeta, Resource, ResourceKey, ResourceKind, ResourceSpec};
pub use routing::{router_for, GatewayRef, Router};
pub use translate::{TranslateMode, TranslateOptions, TranslatedResourceSet, Translator};
pub use validate::validate;
