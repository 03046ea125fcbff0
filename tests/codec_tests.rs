use bcm::codec::*;

fn door_frame(counter: u8) -> CanFrame {
    encode_frame(id::DOOR_CMD, &[0x01, 0xFF], &mut TxCounter::starting_at(counter)).unwrap()
}

#[cfg(test)]
mod checksum_tests {
    use super::*;

    #[test]
    fn test_checksum_matches_seed_fold() {
        let payload = [0x12, 0x34, 0x56, 0x78, 0x9A];
        let expected = payload.iter().fold(CHECKSUM_SEED, |acc, b| acc ^ b);
        assert_eq!(checksum(&payload), expected);
    }

    #[test]
    fn test_every_single_bit_flip_is_detected() {
        let frame = door_frame(2);

        for byte in 0..dlc::COMMAND - 1 {
            for bit in 0..8 {
                let mut bytes = frame.data().to_vec();
                bytes[byte] ^= 1 << bit;
                let corrupted = CanFrame::new(id::DOOR_CMD, &bytes).unwrap();
                let mut counter = RollingCounter::new();
                assert!(
                    matches!(
                        validate(&corrupted, dlc::COMMAND, &mut counter),
                        Err(ProtocolError::ChecksumMismatch { .. })
                    ),
                    "flip of byte {} bit {} went unnoticed",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_version_counter_packing() {
        let packed = pack_version_counter(0x1B);
        assert_eq!(version_of(packed), SCHEMA_VERSION);
        assert_eq!(counter_of(packed), 0x0B);
    }
}

#[cfg(test)]
mod counter_tests {
    use super::*;

    #[test]
    fn test_first_frame_accepts_any_counter() {
        for start in 0..16 {
            let mut counter = RollingCounter::new();
            assert!(validate(&door_frame(start), dlc::COMMAND, &mut counter).is_ok());
            assert_eq!(counter.last(), Some(start));
        }
    }

    #[test]
    fn test_only_successor_is_accepted() {
        for last in 0..16u8 {
            for received in 0..16u8 {
                let mut counter = RollingCounter::new();
                counter.accept(last).unwrap();

                let result = validate(&door_frame(received), dlc::COMMAND, &mut counter);
                if received == (last + 1) % 16 {
                    assert!(result.is_ok());
                } else {
                    assert_eq!(
                        result,
                        Err(ProtocolError::CounterMismatch {
                            expected: (last + 1) % 16,
                            received,
                        })
                    );
                }
            }
        }
    }

    #[test]
    fn test_sequence_wraps_at_sixteen() {
        let mut tx = TxCounter::starting_at(14);
        let mut rx = RollingCounter::new();

        for _ in 0..20 {
            let frame = encode_frame(id::TURN_CMD, &[0x01, 0x00], &mut tx).unwrap();
            assert!(validate(&frame, dlc::COMMAND, &mut rx).is_ok());
        }
        assert_eq!(rx.last(), Some((14 + 19) % 16));
    }

    #[test]
    fn test_mismatch_resynchronizes_on_next_frame() {
        let mut rx = RollingCounter::new();
        validate(&door_frame(0), dlc::COMMAND, &mut rx).unwrap();

        assert!(validate(&door_frame(5), dlc::COMMAND, &mut rx).is_err());
        assert!(validate(&door_frame(6), dlc::COMMAND, &mut rx).is_ok());
    }

    #[test]
    fn test_reset_forgets_baseline() {
        let mut rx = RollingCounter::new();
        rx.accept(3).unwrap();
        rx.reset();
        assert_eq!(rx.expected(), None);
        assert!(rx.accept(9).is_ok());
    }
}

#[cfg(test)]
mod frame_tests {
    use super::*;

    #[test]
    fn test_status_frame_layout() {
        let mut tx = TxCounter::starting_at(15);
        let frame = encode_frame(id::DOOR_STATUS, &[0x0F, 0x00, 0x00, 0x00], &mut tx).unwrap();

        assert_eq!(frame.id(), id::DOOR_STATUS);
        assert_eq!(frame.dlc(), dlc::STATUS);
        assert_eq!(frame.data()[4], 0x1F);
        assert_eq!(frame.data()[5], checksum(&frame.data()[..5]));
        assert_eq!(tx.current(), 0);
    }

    #[test]
    fn test_transmit_counter_advances_on_identical_payloads() {
        let mut tx = TxCounter::new();
        let first = encode_frame(id::HEARTBEAT, &[1, 0], &mut tx).unwrap();
        let second = encode_frame(id::HEARTBEAT, &[1, 0], &mut tx).unwrap();

        assert_eq!(counter_of(first.data()[2]), 0);
        assert_eq!(counter_of(second.data()[2]), 1);
        assert_ne!(first, second);
    }

    #[test]
    fn test_too_long_frame_is_wrong_length() {
        let frame = CanFrame::new(id::LIGHTING_CMD, &[0x02, 0x00, 0x10, 0x00, 0x00]).unwrap();
        let mut rx = RollingCounter::new();
        assert_eq!(
            validate(&frame, dlc::COMMAND, &mut rx),
            Err(ProtocolError::WrongLength { expected: 4, actual: 5 })
        );
    }

    #[test]
    fn test_frame_serializes_to_json() {
        let frame = door_frame(1);
        let json = serde_json::to_string(&frame).unwrap();
        let back: CanFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
