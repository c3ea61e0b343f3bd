pub mod frame;
pub mod pose;
