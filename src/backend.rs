//! Code shipped to the cascaded back-end servers.

pub mod sql;
