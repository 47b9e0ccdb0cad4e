pub mod cluster;
pub mod feature;
pub mod host;
pub mod network;
pub mod security_group;
pub mod share;
pub mod tenant;
pub mod volume;
