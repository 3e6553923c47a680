//! sitewatch: a multi-task real-time detection pipeline for NPU-equipped
//! SoCs. One camera feeds several detection tasks concurrently; each task
//! multiplexes its model across the accelerator cores and renders into its
//! own window through a single display thread.

pub mod cli;
pub mod pipeline;
