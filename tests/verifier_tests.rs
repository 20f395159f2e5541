use serde_json::{json, Value};
use simops::model::{Antenna, Health, OnOff, RfMode};
use simops::overrides::{OverrideState, OverrideUpdate};
use simops::verifier::*;
use std::cell::Cell;

/// Minimal command set: `reboot` is high priority, `beep` is not.
#[derive(Debug)]
enum Toy {
    Reboot,
    Beep,
}

impl Telecommand for Toy {
    type Error = String;

    fn parse(control: &str, _value: &Value) -> Result<Self, Self::Error> {
        match control {
            "reboot" => Ok(Toy::Reboot),
            "beep" => Ok(Toy::Beep),
            other => Err(format!("no such toy '{}'", other)),
        }
    }

    fn high_priority(&self) -> bool {
        matches!(self, Toy::Reboot)
    }
}

fn ready() -> UplinkConditions {
    UplinkConditions {
        carrier: OnOff::On,
        sweep_done: true,
        power_ul: 50.0,
        mode: RfMode::SSupLbr,
        x_antenna: Antenna::Lga,
        obc: Health::Nominal,
    }
}

fn kill(switch: &str) -> OverrideState {
    let mut overrides = OverrideState::default();
    overrides.apply(OverrideUpdate::parse(switch, &json!("enabled")).unwrap());
    overrides
}

/// Verify `control` and report whether the executor ran.
fn run(
    verifier: &TelecommandVerifier,
    conditions: &UplinkConditions,
    overrides: &OverrideState,
    control: &str,
) -> (Verification, bool) {
    let called = Cell::new(false);
    let verification = verifier.verify(conditions, overrides, control, &Value::Null, |_: Toy| {
        called.set(true);
        Ok(())
    });
    (verification, called.get())
}

#[test]
fn test_checks_run_in_order() {
    let verifier = TelecommandVerifier::default();
    let none = OverrideState::default();

    // every failure at once: the kill switch wins
    let mut worst = ready();
    worst.carrier = OnOff::Off;
    worst.power_ul = 0.0;
    worst.mode = RfMode::XSupHbr;
    worst.x_antenna = Antenna::Hga;
    worst.obc = Health::Error;
    let (v, _) = run(&verifier, &worst, &kill("no_tc"), "nonsense");
    assert_eq!(v.outcome, TcOutcome::NoTelecommand);

    // the blackout outranks a dead link
    let (v, _) = run(&verifier, &worst, &none, "nonsense");
    assert_eq!(v.outcome, TcOutcome::Blackout);

    worst.x_antenna = Antenna::Lga;
    let (v, _) = run(&verifier, &worst, &none, "nonsense");
    assert_eq!(v.outcome, TcOutcome::LinkNotReady);

    worst.carrier = OnOff::On;
    worst.sweep_done = true;
    let (v, _) = run(&verifier, &worst, &none, "nonsense");
    assert_eq!(v.outcome, TcOutcome::UplinkPowerLow);

    worst.power_ul = 80.0;
    let (v, _) = run(&verifier, &worst, &none, "nonsense");
    assert_eq!(v.outcome, TcOutcome::Rejected);
    assert_eq!(v.reason.as_deref(), Some("no such toy 'nonsense'"));

    let (v, _) = run(&verifier, &worst, &none, "beep");
    assert_eq!(v.outcome, TcOutcome::ObcLockout);
}

#[test]
fn test_sweep_is_part_of_reception() {
    let mut conditions = ready();
    conditions.sweep_done = false;
    let (v, called) = run(&TelecommandVerifier::default(), &conditions, &OverrideState::default(), "beep");
    assert_eq!(v.outcome, TcOutcome::LinkNotReady);
    assert!(!called);
}

#[test]
fn test_minimum_uplink_power_is_configurable() {
    let none = OverrideState::default();
    let strict = TelecommandVerifier::new(60.0);
    let (v, called) = run(&strict, &ready(), &none, "beep");
    assert_eq!(v.outcome, TcOutcome::UplinkPowerLow);
    assert_eq!(v.status(), "g:REL r:ACC r:FAIL");
    assert!(!called);

    let (v, called) = run(&TelecommandVerifier::default(), &ready(), &none, "beep");
    assert_eq!(v.outcome, TcOutcome::Executed);
    assert!(called);
}

#[test]
fn test_executor_only_runs_after_every_check() {
    let verifier = TelecommandVerifier::default();
    let none = OverrideState::default();

    let mut locked = ready();
    locked.obc = Health::Error;
    let (v, called) = run(&verifier, &locked, &none, "beep");
    assert_eq!(v.status(), "g:REL g:ACC w:UNK");
    assert!(!called);

    let (v, called) = run(&verifier, &locked, &none, "reboot");
    assert_eq!(v.outcome, TcOutcome::Executed);
    assert!(called);

    let (v, called) = run(&verifier, &ready(), &kill("no_tc"), "beep");
    assert_eq!(v.status(), "g:REL w:ACC w:UNK");
    assert!(!called);
}

#[test]
fn test_execution_failure_carries_reason() {
    let verifier = TelecommandVerifier::default();
    let v = verifier.verify(&ready(), &OverrideState::default(), "beep", &Value::Null, |_: Toy| {
        Err("interlock")
    });
    assert_eq!(v.outcome, TcOutcome::ExecutionFailed);
    assert_eq!(v.status(), "g:REL g:ACC r:FAIL");
    assert_eq!(v.reason.as_deref(), Some("interlock"));
    assert!(v.outcome.reached_execution());
}

#[test]
fn test_missing_telemetry_hides_execution_result() {
    let verifier = TelecommandVerifier::default();
    let no_tm = kill("no_tm");

    let (v, called) = run(&verifier, &ready(), &no_tm, "beep");
    assert!(called);
    assert_eq!(v.outcome, TcOutcome::Executed);
    assert_eq!(v.status(), "g:REL g:ACC w:UNK");

    let failed = verifier.verify(&ready(), &no_tm, "beep", &Value::Null, |_: Toy| Err("nope"));
    assert_eq!(failed.status(), "g:REL g:ACC w:UNK");

    // earlier stages are unaffected
    let (v, _) = run(&verifier, &ready(), &no_tm, "nonsense");
    assert_eq!(v.status(), "g:REL r:ACC r:FAIL");
}

#[test]
fn test_reports_parse_back() {
    for outcome in [
        TcOutcome::NoTelecommand,
        TcOutcome::LinkNotReady,
        TcOutcome::UplinkPowerLow,
        TcOutcome::Blackout,
        TcOutcome::Rejected,
        TcOutcome::ObcLockout,
        TcOutcome::ExecutionFailed,
        TcOutcome::Executed,
    ] {
        let report = outcome.report();
        assert_eq!(report.to_string().parse::<VerificationReport>().unwrap(), report);
    }
    assert_eq!(
        "g:REL g:ACC g:OK".parse::<VerificationReport>().unwrap().execution,
        Stamp::Pass
    );
}
