use bcm::codec::{dlc, encode_frame, id, CanFrame, TxCounter};
use bcm::fault::{codes, FaultManager, FaultStatus};
use bcm::subsystems::{
    CommandResult, DoorCommand, DoorSystem, HeadlightCommand, HeadlightMode, HeadlightOutput,
    InteriorMode, LightingCommand, LightingSystem, LockState, Subsystem, SubsystemError,
    TurnCommand, TurnMode, TurnSignalSystem,
};

fn door_frame(command: DoorCommand, tx: &mut TxCounter) -> CanFrame {
    encode_frame(id::DOOR_CMD, &command.to_bytes(), tx).unwrap()
}

/// Runs the 10 ms update from `from` (exclusive) through `to` (inclusive).
fn run_turn(turn: &mut TurnSignalSystem, faults: &mut FaultManager, from: u32, to: u32) {
    let mut now = from + 10;
    while now <= to {
        turn.update(now, faults);
        now += 10;
    }
}

#[cfg(test)]
mod door_system_tests {
    use super::*;

    #[test]
    fn test_lock_all_settles_after_one_tick() {
        let mut door = DoorSystem::default();
        let mut faults = FaultManager::default();
        let mut tx = TxCounter::new();

        let result = door.handle_frame(&door_frame(DoorCommand::LockAll, &mut tx), 0, &mut faults);
        assert_eq!(result, CommandResult::Ok);
        assert_eq!(door.lock_state(0), Some(LockState::Locking));

        door.update(10, &mut faults);
        assert!(door.all_locked());
        assert_eq!(door.status_payload(&faults), [0x0F, 0x00, 0, 0]);
    }

    #[test]
    fn test_single_door_commands() {
        let mut door = DoorSystem::default();
        let mut faults = FaultManager::default();
        let mut tx = TxCounter::new();

        door.handle_frame(&door_frame(DoorCommand::LockSingle(2), &mut tx), 0, &mut faults);
        door.update(10, &mut faults);
        assert_eq!(door.lock_state(2), Some(LockState::Locked));
        assert_eq!(door.lock_state(0), Some(LockState::Unlocked));
        assert!(door.any_unlocked());

        door.handle_frame(&door_frame(DoorCommand::UnlockSingle(2), &mut tx), 20, &mut faults);
        door.update(30, &mut faults);
        assert_eq!(door.lock_state(2), Some(LockState::Unlocked));
        assert_eq!(door.state().last_result, CommandResult::Ok);
    }

    #[test]
    fn test_reversal_mid_travel() {
        let mut door = DoorSystem::default();
        let mut faults = FaultManager::default();

        door.lock_all(0);
        door.unlock_all(5);
        assert_eq!(door.lock_state(1), Some(LockState::Unlocking));

        door.update(10, &mut faults);
        assert_eq!(door.lock_state(1), Some(LockState::Unlocking));
        door.update(20, &mut faults);
        assert_eq!(door.lock_state(1), Some(LockState::Unlocked));
    }

    #[test]
    fn test_repeat_command_does_not_restart_travel() {
        let mut door = DoorSystem::default();
        let mut faults = FaultManager::default();

        door.lock_all(0);
        door.lock_all(5);
        door.update(10, &mut faults);
        assert!(door.all_locked());
    }

    #[test]
    fn test_door_index_out_of_range_is_rejected() {
        let mut door = DoorSystem::default();
        let mut faults = FaultManager::default();
        let mut tx = TxCounter::new();

        let frame = door_frame(DoorCommand::LockSingle(4), &mut tx);
        let result = door.handle_frame(&frame, 0, &mut faults);

        assert_eq!(result, CommandResult::CommandOutOfRange);
        assert_eq!(door.lock_state(3), Some(LockState::Unlocked));

        let code = codes::DOOR_BASE | codes::COMMAND_RANGE;
        assert_eq!(faults.status(code), FaultStatus::Pending);
        let freeze = faults.record(code).unwrap().freeze_frame.unwrap();
        assert_eq!(&freeze[..dlc::COMMAND], frame.data());
        assert_eq!(&freeze[dlc::COMMAND..], &[0, 0, 0, 0]);

        assert_eq!(door.status_payload(&faults), [0x00, 0x00, 4, 1]);
    }

    #[test]
    fn test_corrupted_frame_does_not_touch_counter() {
        let mut door = DoorSystem::default();
        let mut faults = FaultManager::default();

        let good = door_frame(DoorCommand::LockAll, &mut TxCounter::new());
        let mut bytes = good.data().to_vec();
        bytes[1] ^= 0x01;
        let bad = CanFrame::new(id::DOOR_CMD, &bytes).unwrap();

        assert_eq!(door.handle_frame(&bad, 0, &mut faults), CommandResult::ChecksumMismatch);
        assert!(faults.is_present(codes::DOOR_BASE | codes::CHECKSUM));

        assert_eq!(door.handle_frame(&good, 10, &mut faults), CommandResult::Ok);
        assert_eq!(door.lock_state(0), Some(LockState::Locking));
    }

    #[test]
    fn test_counter_gap_rejects_then_resyncs() {
        let mut door = DoorSystem::default();
        let mut faults = FaultManager::default();

        let first = door_frame(DoorCommand::LockAll, &mut TxCounter::starting_at(0));
        let skipped = door_frame(DoorCommand::UnlockAll, &mut TxCounter::starting_at(2));
        let next = door_frame(DoorCommand::UnlockAll, &mut TxCounter::starting_at(3));

        assert_eq!(door.handle_frame(&first, 0, &mut faults), CommandResult::Ok);
        assert_eq!(door.handle_frame(&skipped, 10, &mut faults), CommandResult::CounterMismatch);
        assert_eq!(door.lock_state(0), Some(LockState::Locking));
        assert_eq!(door.handle_frame(&next, 20, &mut faults), CommandResult::Ok);
        assert_eq!(door.lock_state(0), Some(LockState::Unlocking));
    }

    #[test]
    fn test_auto_lock_triggers_once_and_rearms() {
        let mut door = DoorSystem::default();
        let mut faults = FaultManager::default();

        door.update_vehicle_speed(10, 0);
        assert_eq!(door.lock_state(0), Some(LockState::Unlocked));

        door.update_vehicle_speed(15, 100);
        door.update(110, &mut faults);
        assert!(door.all_locked());

        door.unlock_all(200);
        door.update(210, &mut faults);
        door.update_vehicle_speed(40, 300);
        door.update(310, &mut faults);
        assert!(!door.all_locked());

        door.update_vehicle_speed(0, 400);
        door.update_vehicle_speed(20, 500);
        door.update(510, &mut faults);
        assert!(door.all_locked());
        assert!(door.state().auto_lock_triggered);
    }

    #[test]
    fn test_auto_lock_disabled() {
        let mut door = DoorSystem::default();
        door.set_auto_lock(false);
        door.update_vehicle_speed(80, 0);
        assert_eq!(door.lock_state(0), Some(LockState::Unlocked));
    }

    #[test]
    fn test_door_open_inputs() {
        let mut door = DoorSystem::default();
        let faults = FaultManager::default();

        door.set_door_open(2, true).unwrap();
        assert!(door.any_open());
        assert_eq!(door.status_payload(&faults)[1], 0x04);

        assert_eq!(door.set_door_open(9, true), Err(SubsystemError::InvalidDoor(9)));
        assert_eq!(door.lock_door(4, 0), Err(SubsystemError::InvalidDoor(4)));
        assert_eq!(door.lock_state(4), None);
    }

    #[test]
    fn test_door_status_frame() {
        let mut door = DoorSystem::default();
        let faults = FaultManager::default();

        let first = door.build_status_frame(&faults).unwrap();
        let second = door.build_status_frame(&faults).unwrap();
        assert_eq!(first.id(), id::DOOR_STATUS);
        assert_eq!(first.dlc(), dlc::STATUS);
        assert_eq!(first.data()[4], 0x10);
        assert_eq!(second.data()[4], 0x11);
    }
}

#[cfg(test)]
mod lighting_system_tests {
    use super::*;

    fn lighting_frame(command: LightingCommand, tx: &mut TxCounter) -> CanFrame {
        encode_frame(id::LIGHTING_CMD, &command.to_bytes(), tx).unwrap()
    }

    #[test]
    fn test_auto_hysteresis() {
        let mut lighting = LightingSystem::default();
        let mut faults = FaultManager::default();

        lighting.set_headlight_mode(HeadlightMode::Auto, 0);
        assert_eq!(lighting.headlight_output(), HeadlightOutput::Off);

        lighting.set_ambient_light(70, 10, &mut faults);
        assert_eq!(lighting.headlight_output(), HeadlightOutput::AutoOn);

        for level in [80, 100, 120] {
            lighting.set_ambient_light(level, 20, &mut faults);
            assert_eq!(lighting.headlight_output(), HeadlightOutput::AutoOn, "level {}", level);
        }

        lighting.set_ambient_light(121, 30, &mut faults);
        assert_eq!(lighting.headlight_output(), HeadlightOutput::Off);

        for level in [120, 100, 80] {
            lighting.set_ambient_light(level, 40, &mut faults);
            assert_eq!(lighting.headlight_output(), HeadlightOutput::Off, "level {}", level);
        }

        lighting.set_ambient_light(79, 50, &mut faults);
        assert!(lighting.headlights_on());
    }

    #[test]
    fn test_high_beam_requires_headlights() {
        let mut lighting = LightingSystem::default();

        lighting.set_high_beam(true);
        assert_eq!(lighting.headlight_output(), HeadlightOutput::Off);

        lighting.set_headlight_mode(HeadlightMode::On, 0);
        assert_eq!(lighting.headlight_output(), HeadlightOutput::HighBeam);

        lighting.set_headlight_mode(HeadlightMode::Off, 10);
        lighting.set_headlight_mode(HeadlightMode::On, 20);
        assert_eq!(lighting.headlight_output(), HeadlightOutput::On);
    }

    #[test]
    fn test_ambient_timeout_reported_once_and_healed() {
        let mut lighting = LightingSystem::default();
        let mut faults = FaultManager::default();

        lighting.set_headlight_mode(HeadlightMode::Auto, 0);
        lighting.update(9_990, &mut faults);
        assert!(!faults.is_present(codes::LIGHTING_AMBIENT_TIMEOUT));

        lighting.update(10_000, &mut faults);
        lighting.update(10_010, &mut faults);
        assert_eq!(faults.status(codes::LIGHTING_AMBIENT_TIMEOUT), FaultStatus::Pending);
        assert_eq!(
            faults.record(codes::LIGHTING_AMBIENT_TIMEOUT).unwrap().occurrence_count,
            1
        );

        lighting.set_ambient_light(50, 10_500, &mut faults);
        assert_eq!(faults.status(codes::LIGHTING_AMBIENT_TIMEOUT), FaultStatus::Healed);
    }

    #[test]
    fn test_ambient_timeout_raised_again_after_clear() {
        let mut lighting = LightingSystem::default();
        let mut faults = FaultManager::default();

        lighting.set_headlight_mode(HeadlightMode::Auto, 0);
        lighting.update(10_000, &mut faults);
        assert_eq!(faults.status(codes::LIGHTING_AMBIENT_TIMEOUT), FaultStatus::Pending);

        faults.clear_all();
        lighting.update(10_010, &mut faults);
        assert_eq!(faults.status(codes::LIGHTING_AMBIENT_TIMEOUT), FaultStatus::Pending);
        assert_eq!(
            faults.record(codes::LIGHTING_AMBIENT_TIMEOUT).unwrap().occurrence_count,
            2
        );

        faults.clear_dtc(0x00FF_FFFF).unwrap();
        lighting.set_headlight_mode(HeadlightMode::On, 20_000);
        lighting.update(60_000, &mut faults);
        assert_eq!(faults.status(codes::LIGHTING_AMBIENT_TIMEOUT), FaultStatus::Inactive);

        lighting.set_headlight_mode(HeadlightMode::Auto, 70_010);
        lighting.update(80_000, &mut faults);
        assert!(!faults.is_present(codes::LIGHTING_AMBIENT_TIMEOUT));
        lighting.update(80_010, &mut faults);
        assert!(faults.is_present(codes::LIGHTING_AMBIENT_TIMEOUT));
    }

    #[test]
    fn test_no_ambient_timeout_outside_auto() {
        let mut lighting = LightingSystem::default();
        let mut faults = FaultManager::default();

        lighting.set_headlight_mode(HeadlightMode::On, 0);
        lighting.update(60_000, &mut faults);
        assert_eq!(faults.record_count(), 0);
    }

    #[test]
    fn test_interior_brightness_by_frame() {
        let mut lighting = LightingSystem::default();
        let mut faults = FaultManager::default();
        let mut tx = TxCounter::new();

        let on = LightingCommand {
            headlight: HeadlightCommand::On,
            interior: InteriorMode::On,
            brightness: 9,
        };
        assert_eq!(lighting.handle_frame(&lighting_frame(on, &mut tx), 0, &mut faults), CommandResult::Ok);
        assert_eq!(lighting.state().interior_brightness, 9);
        assert_eq!(lighting.status_payload(&faults), [1, 0x91, 128, 0]);

        let auto = LightingCommand {
            interior: InteriorMode::Auto,
            brightness: 3,
            ..on
        };
        lighting.handle_frame(&lighting_frame(auto, &mut tx), 10, &mut faults);
        assert_eq!(lighting.state().interior_brightness, 9);

        let off = LightingCommand {
            interior: InteriorMode::Off,
            ..on
        };
        lighting.handle_frame(&lighting_frame(off, &mut tx), 20, &mut faults);
        assert_eq!(lighting.state().interior_brightness, 0);
        assert_eq!(lighting.state().interior_mode, InteriorMode::Off);
    }

    #[test]
    fn test_unknown_headlight_command() {
        let mut lighting = LightingSystem::default();
        let mut faults = FaultManager::default();

        let frame = encode_frame(id::LIGHTING_CMD, &[0x05, 0x00], &mut TxCounter::new()).unwrap();
        let result = lighting.handle_frame(&frame, 0, &mut faults);

        assert_eq!(result, CommandResult::CommandOutOfRange);
        assert!(faults.is_present(codes::LIGHTING_BASE | codes::COMMAND_RANGE));
        assert_eq!(lighting.status_payload(&faults)[3], 4);
    }
}

#[cfg(test)]
mod turn_signal_tests {
    use super::*;

    #[test]
    fn test_left_flashes_alone_at_normal_rate() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();

        turn.set_mode(TurnMode::Left, 0, &mut faults);
        assert!(turn.left_on());
        assert!(!turn.right_on());
        assert_eq!(turn.blink_count(), 1);

        run_turn(&mut turn, &mut faults, 0, 490);
        assert!(turn.left_on());
        run_turn(&mut turn, &mut faults, 490, 500);
        assert!(!turn.left_on());
        assert!(!turn.right_on());
        run_turn(&mut turn, &mut faults, 500, 1000);
        assert!(turn.left_on());
        assert_eq!(turn.blink_count(), 2);
    }

    #[test]
    fn test_hazard_flashes_both_sides() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();

        turn.set_mode(TurnMode::Hazard, 0, &mut faults);
        assert!(turn.left_on() && turn.right_on());

        run_turn(&mut turn, &mut faults, 0, 390);
        assert!(turn.left_on() && turn.right_on());
        run_turn(&mut turn, &mut faults, 390, 400);
        assert!(!turn.left_on() && !turn.right_on());
        run_turn(&mut turn, &mut faults, 400, 800);
        assert!(turn.left_on() && turn.right_on());
        assert_eq!(turn.blink_count(), 2);
    }

    #[test]
    fn test_hazard_off_only_cancels_hazard() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();
        let mut tx = TxCounter::new();
        let frame = |cmd: TurnCommand, tx: &mut TxCounter| {
            encode_frame(id::TURN_CMD, &cmd.to_bytes(), tx).unwrap()
        };

        turn.handle_frame(&frame(TurnCommand::Right, &mut tx), 0, &mut faults);
        turn.handle_frame(&frame(TurnCommand::HazardOff, &mut tx), 10, &mut faults);
        assert_eq!(turn.mode(), TurnMode::Right);

        turn.handle_frame(&frame(TurnCommand::HazardOn, &mut tx), 20, &mut faults);
        turn.handle_frame(&frame(TurnCommand::HazardOff, &mut tx), 30, &mut faults);
        assert_eq!(turn.mode(), TurnMode::Off);
        assert_eq!(turn.blink_count(), 0);
    }

    #[test]
    fn test_bulb_failure_switches_to_fast_flash() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();

        turn.update_bulb_current(40, 450);
        turn.set_mode(TurnMode::Left, 0, &mut faults);
        turn.update(10, &mut faults);

        assert!(!turn.left_bulb_ok());
        assert!(turn.right_bulb_ok());
        assert!(turn.fast_flash());
        assert_eq!(faults.status(codes::TURN_LEFT_BULB), FaultStatus::Pending);

        run_turn(&mut turn, &mut faults, 10, 240);
        assert!(turn.left_on());
        run_turn(&mut turn, &mut faults, 240, 250);
        assert!(!turn.left_on());
        run_turn(&mut turn, &mut faults, 250, 500);
        assert!(turn.left_on());

        assert_eq!(turn.status_payload(&faults), [1, 0x01 | 0x10 | 0x80, 2, 0]);
    }

    #[test]
    fn test_bulb_restored_heals_fault() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();

        turn.update_bulb_current(450, 30);
        turn.set_mode(TurnMode::Right, 0, &mut faults);
        turn.update(10, &mut faults);
        assert!(!turn.right_bulb_ok());

        turn.update_bulb_current(450, 450);
        turn.update(20, &mut faults);
        assert!(turn.right_bulb_ok());
        assert!(!turn.fast_flash());
        assert_eq!(faults.status(codes::TURN_RIGHT_BULB), FaultStatus::Healed);
    }

    #[test]
    fn test_unlit_side_is_not_checked() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();

        turn.update_bulb_current(450, 0);
        turn.set_mode(TurnMode::Left, 0, &mut faults);
        run_turn(&mut turn, &mut faults, 0, 100);
        assert!(turn.right_bulb_ok());
        assert_eq!(faults.record_count(), 0);
    }

    #[test]
    fn test_inactivity_timeout_cancels_turn() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();

        turn.set_mode(TurnMode::Left, 0, &mut faults);
        turn.check_timeout(29_999, &mut faults);
        assert_eq!(turn.mode(), TurnMode::Left);

        turn.check_timeout(30_000, &mut faults);
        assert_eq!(turn.mode(), TurnMode::Off);
        assert!(!turn.left_on());
        assert_eq!(faults.status(codes::TURN_TIMEOUT), FaultStatus::Pending);

        turn.set_mode(TurnMode::Right, 31_000, &mut faults);
        assert_eq!(faults.status(codes::TURN_TIMEOUT), FaultStatus::Healed);
    }

    #[test]
    fn test_reselect_refreshes_inactivity_timer() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();

        turn.set_mode(TurnMode::Right, 0, &mut faults);
        turn.set_mode(TurnMode::Right, 20_000, &mut faults);
        turn.check_timeout(30_000, &mut faults);
        assert_eq!(turn.mode(), TurnMode::Right);
        assert_eq!(turn.blink_count(), 1);
    }

    #[test]
    fn test_hazard_never_times_out() {
        let mut turn = TurnSignalSystem::default();
        let mut faults = FaultManager::default();

        turn.set_mode(TurnMode::Hazard, 0, &mut faults);
        turn.check_timeout(120_000, &mut faults);
        assert_eq!(turn.mode(), TurnMode::Hazard);
    }
}
