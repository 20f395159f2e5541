use proptest::prelude::*;
use simops::geometry::FixedGeometry;
use simops::link::{self, DownlinkLadder, UPLINK_LADDER};
use simops::model::{LockState, OnOff, RfMode};
use simops::overrides::OverrideState;
use simops::spacecraft::{SpacecraftEngine, SpacecraftState};
use simops::verifier::TelecommandVerifier;
use std::sync::Arc;

fn any_mode() -> impl Strategy<Value = RfMode> {
    prop::sample::select(RfMode::ALL.to_vec())
}

fn on_off() -> impl Strategy<Value = OnOff> {
    prop_oneof![Just(OnOff::On), Just(OnOff::Off)]
}

#[test]
fn test_thresholds_reach_their_stage() {
    for (stage, threshold) in UPLINK_LADDER {
        assert_eq!(link::uplink_lock(threshold), stage);
    }
    for mode in RfMode::ALL.iter().copied() {
        let ladder = DownlinkLadder::for_mode(mode);
        assert_eq!(ladder.lock(ladder.frame), LockState::FrameLock);
        assert_eq!(ladder.lock(ladder.bit), LockState::BitLock);
        assert_eq!(ladder.lock(ladder.pll), LockState::PllLock);
        assert_eq!(ladder.lock(link::NO_SIGNAL_SNR), LockState::NoRf);
    }
}

proptest! {
    #[test]
    fn downlink_lock_is_monotonic_in_snr(mode in any_mode(), a in -150.0f64..50.0, b in -150.0f64..50.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(link::downlink_lock(mode, low) <= link::downlink_lock(mode, high));
    }

    #[test]
    fn uplink_lock_is_monotonic_in_snr(a in -150.0f64..50.0, b in -150.0f64..50.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(link::uplink_lock(low) <= link::uplink_lock(high));
    }

    #[test]
    fn farther_is_never_stronger(near in 100.0f64..5_000.0, extra in 0.0f64..5_000.0, power in 0.0f64..=100.0) {
        prop_assert!(link::downlink_snr(near + extra) <= link::downlink_snr(near));
        prop_assert!(link::uplink_snr(near + extra, power) <= link::uplink_snr(near, power));
    }

    // Battery depth and memory fill stay in range whatever the loads and
    // step sizes.
    #[test]
    fn battery_and_memory_stay_in_range(
        dod in 0.0f64..=100.0,
        memory in 0.0f64..=100.0,
        sunlit in any::<bool>(),
        tx in on_off(),
        camera in on_off(),
        gps in on_off(),
        steps in prop::collection::vec(0.0f64..5_000.0, 1..30),
    ) {
        let geometry = Arc::new(FixedGeometry::new());
        geometry.set_sunlit(sunlit);
        let mut initial = SpacecraftState::default();
        initial.eps.battery_dod = dod;
        initial.dhs.memory = memory;
        initial.ttc.tx_status = tx;
        initial.pl.camera_status = camera;
        initial.pl.gps_status = gps;
        let engine = SpacecraftEngine::new(initial, geometry, TelecommandVerifier::default(), Some(4));

        let mut ts = 1_000.0;
        let none = OverrideState::default();
        for dt in steps {
            ts += dt;
            let sc = engine.ping(ts, None, &none).unwrap();
            prop_assert!((0.0..=100.0).contains(&sc.eps.battery_dod), "dod {}", sc.eps.battery_dod);
            prop_assert!((0.0..=100.0).contains(&sc.dhs.memory), "memory {}", sc.dhs.memory);
        }
    }
}
