pub mod apply;
pub mod delete;
pub mod render;
pub mod status;
