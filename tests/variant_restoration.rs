//! Profile restoration under injected switch faults and cancellation

use std::sync::Arc;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use panel_backup::page::simulated::{CancelTrigger, DeviceFixture, PanelFixture, SimulatedDevice, SwitchFault};
use panel_backup::{BackupRunner, BackupSettings, CaptureOptions, RunOutcome, RunReport, Session, ZipArchiveSink};

/// At most two failures, then a success: every switch lands within its attempt budget
fn fault_group() -> impl Strategy<Value = Vec<SwitchFault>> {
    prop::collection::vec(prop_oneof![Just(SwitchFault::Reject), Just(SwitchFault::Error)], 0..=2).prop_map(
        |mut group| {
            group.push(SwitchFault::Accept);
            group
        },
    )
}

fn run_case(
    primary: &str,
    secondary: &str,
    faults: Vec<SwitchFault>,
    cancel_after: Option<usize>,
) -> (RunReport, Arc<SimulatedDevice>) {
    let mut fixture = DeviceFixture::default().with_panel(
        PanelFixture::new("tab_pid_tuning", 0.0)
            .subpanel("subtab-pid", 0.0)
            .subpanel("subtab-rates", 0.0)
            .subpanel("subtab-filter", 0.0),
    );
    fixture.variants.primary_active = primary.to_string();
    fixture.variants.secondary_active = secondary.to_string();
    fixture.variants.faults = faults;
    let device = Arc::new(SimulatedDevice::new(fixture));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    let report = runtime.block_on(async {
        let runner = BackupRunner::new(device.clone(), device.clone(), BackupSettings::defaults());
        if let Some(switches) = cancel_after {
            let trigger = CancellationToken::new();
            device.cancel_on(CancelTrigger::Switches(switches), trigger.clone());
            let controller = runner.controller();
            tokio::spawn(async move {
                trigger.cancelled().await;
                controller.cancel();
            });
        }

        let session = Session::new("unused");
        let sink = Box::new(ZipArchiveSink::for_session(&session));
        runner.start(CaptureOptions::default(), session, sink).unwrap().await
    });
    (report, device)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_profiles_restored_after_any_run(
        primary in prop_oneof![Just("0"), Just("1"), Just("2")],
        secondary in prop_oneof![Just("0"), Just("1")],
        groups in prop::collection::vec(fault_group(), 0..8),
        cancel_after in prop::option::of(1usize..6),
    ) {
        let faults: Vec<SwitchFault> = groups.into_iter().flatten().collect();
        let (report, device) = run_case(primary, secondary, faults, cancel_after);

        prop_assert_eq!(device.variant_values(), (primary.to_string(), secondary.to_string()));
        prop_assert!(
            matches!(report.outcome, RunOutcome::Complete(_) | RunOutcome::Cancelled),
            "unexpected outcome {:?}",
            report.outcome
        );
        if cancel_after.is_none() {
            prop_assert_eq!(report.summary.assets_written, 6);
        }
    }
}

#[test]
fn test_restoration_survives_failed_cycle_switch() {
    // "0" is never applied while cycling; restoration still lands on "1"
    let faults = vec![SwitchFault::Error, SwitchFault::Error, SwitchFault::Error];
    let (report, device) = run_case("1", "0", faults, None);

    assert!(matches!(report.outcome, RunOutcome::Complete(_)));
    assert_eq!(device.variant_values(), ("1".to_string(), "0".to_string()));
    assert!(report.summary.warnings.iter().any(|w| w.contains("profile 0 not confirmed")));
}
