//! Resource model: requirements, resource lists, instance types and offerings.
//!
//! Pure data and pure functions; nothing in this module touches the cluster
//! API-server or the cloud-provider port.

pub mod instance_type;
pub mod offering;
pub mod requirements;
pub mod resource_list;

pub use instance_type::{InstanceType, InstanceTypes, MinValuesPolicy};
pub use offering::{adjusted_price, CapacityType, Offering, Offerings};
pub use requirements::{Operator, Requirement, Requirements};
pub use resource_list::{Overhead, Quantity, ResourceList};
