pub mod cluster_autoscaler;
pub mod estimator;
pub mod filter_out_schedulable;
pub mod interface;
pub mod scale_down;
pub mod scale_up;
pub mod static_autoscaler;
pub mod wrapper;
