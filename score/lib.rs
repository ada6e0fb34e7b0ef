#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod catalog;
pub mod data;
pub mod evaluate;
pub mod feedback;
pub mod model;
pub mod pipeline;
pub mod stats;
pub mod types;
