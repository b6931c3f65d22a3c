pub mod cpu;
mod kernels;

pub use cpu::{CpuExecutable, CpuGraphBackend};
