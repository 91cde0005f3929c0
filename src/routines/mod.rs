// Routines for implicit gradients
pub mod ift;
// Routines for linear algebra
pub mod linalg;
// Routines for mapping group weights to sample weights
pub mod mapping;
// Routines for the weight search loop
pub mod optimizer;
// Routines for output
pub mod output;
// Routines for settings
pub mod settings;
// Routines for simplex projection
pub mod simplex;
