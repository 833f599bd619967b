//! Orchestrator phases: modularized installation pipeline stages.
//!
//! This module organizes the orchestrator's responsibilities into distinct phases:
//! - **Phase 1: Preparation** (`prep`) - Manifest parsing and environment preconditions
//! - **Phase 2: Kernel module** (`kernel`) - Inline acquisition, DKMS deferral, or skip
//! - **Phase 3: File set** (`files`) - Trimming, rewriting and destination assignment
//! - **Phase 4: Installation** (`install`) - Planning, approval, backup and execution
//! - **Phase 5: Post-install** (`post`) - Hooks, sanity checks and completion
//!
//! Each phase is independently testable and can be composed into higher-level workflows.

pub mod files;
pub mod install;
pub mod kernel;
pub mod post;
pub mod prep;

pub use files::{set_destinations, transform_file_set};
pub use install::{execute_installation, plan_installation};
pub use kernel::kernel_module_stage;
pub use post::{report_completion, verify_installation};
