pub mod funnel;
pub mod models;
pub mod normalize;
