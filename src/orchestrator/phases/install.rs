//! Phase 4: Installation - plan, approve, back up, execute, register.

use crate::log_info;
use crate::models::Package;
use crate::orchestrator::state::{Halt, InstallPhase, PipelineState, StageResult};
use crate::orchestrator::Collaborators;
use crate::system::commands::OperationList;

/// Remove the old driver, then build the operation list and get it approved.
pub fn plan_installation(
    state: &mut PipelineState,
    package: &Package,
    c: &mut Collaborators<'_>,
) -> StageResult<OperationList> {
    state.enter(InstallPhase::Planning);
    let opts = &state.options;

    if !opts.kernel_module_only {
        c.backup.uninstall_existing_driver(opts, &mut *c.ui)?;
    }

    let list = c.planner.build(package, opts)?;
    log_info!("[Install] Operation list has {} steps", list.len());

    if !c.ui.approve_operation_list(&list, &package.description) {
        c.ui.log("Operation list not approved; aborting installation.");
        return Err(Halt::Declined);
    }
    Ok(list)
}

/// Open the backup record, run the operation list, and register with DKMS.
pub fn execute_installation(
    state: &mut PipelineState,
    package: &Package,
    list: &OperationList,
    c: &mut Collaborators<'_>,
) -> StageResult<()> {
    state.enter(InstallPhase::Installation);
    let opts = &state.options;

    if !opts.kernel_module_only {
        c.backup.init_record(package, opts)?;
    }

    c.planner.execute(list, &mut *c.backup, &mut *c.ui)?;
    log_info!("[Install] Operation list executed");

    if state.dkms_deferred {
        c.dkms.register(package, opts)?;
        log_info!("[Install] Kernel module registered with DKMS");
    }
    Ok(())
}
