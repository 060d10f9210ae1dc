pub mod plot_model;
pub mod task;
