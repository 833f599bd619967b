//! Kernel Module Management Module
//!
//! Handles everything needed to end up with a loadable kernel module:
//! - Toolchain operations (install path, compiler check, build, link, load test)
//! - Precompiled interface bundles (pack, unpack, match against the running kernel)
//! - Acquisition, which chooses between linking and compiling

pub mod acquisition;
pub mod precompiled;
pub mod toolchain;

pub use acquisition::acquire_kernel_module;
pub use precompiled::PrecompiledInfo;
pub use toolchain::{KernelToolchain, SystemToolchain};
