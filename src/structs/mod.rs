pub mod dataset;
pub mod gprob;
pub mod groups;
pub mod weights;
