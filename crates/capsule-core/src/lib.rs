//! # Capsule Core
//!
//! Leaf types shared by every layer of the Capsule plugin framework.
//!
//! This crate provides:
//! - [`PropertyValue`] and [`Properties`], the case-insensitive metadata maps
//!   attached to services and to the framework itself
//! - [`Filter`], the LDAP-style predicate language used for service lookup
//!   and service-listener filtering
//! - The error taxonomy ([`FrameworkError`], [`InstallError`], [`FilterError`])
//! - Plugin identity and lifecycle types ([`PluginId`], [`PluginState`],
//!   [`DeliveryMode`])
//!
//! Nothing here locks, spawns or touches the filesystem; the registries that
//! do live in `capsule-framework`.

pub mod error;
pub mod filter;
pub mod plugin;
pub mod properties;

pub use error::{BoxError, FilterError, FrameworkError, FrameworkResult, InstallError};
pub use filter::{CompareOp, Filter};
pub use plugin::{DeliveryMode, PluginId, PluginState, ServiceId};
pub use properties::{Properties, PropertyValue, keys};
