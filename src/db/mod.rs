pub mod accessors;
pub mod descriptor;
pub mod models;
