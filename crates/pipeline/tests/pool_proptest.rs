//! Property-based tests for the scratch pool.
//! Random interleavings of acquire/publish/release must track a simple model:
//! a slot is never handed out twice before it is released.

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use pipeline::pool::{PingPongPool, PoolError, SlotState};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Write(usize),
    Publish(u16),
    AbandonWrite,
    Read(usize, u16),
    Release,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3).prop_map(Op::Write),
        (0u16..4).prop_map(Op::Publish),
        Just(Op::AbandonWrite),
        (0usize..3, 0u16..4).prop_map(|(s, i)| Op::Read(s, i)),
        Just(Op::Release),
    ]
}

proptest! {
    /// Pool state always equals the model, and every refused call is refused
    /// with the error the model predicts.
    #[test]
    fn pool_follows_slot_lifecycle(ops in prop::collection::vec(op(), 1..64)) {
        let pool = PingPongPool::<NoopRawMutex, 2, 16>::new();
        let mut model = [SlotState::Free; 2];
        let mut writer = None;
        let mut reader = None;

        for op in ops {
            match op {
                Op::Write(slot) => {
                    let expected = match model.get(slot) {
                        None => Err(PoolError::NoSuchSlot { slot }),
                        Some(SlotState::Free) => Ok(()),
                        Some(_) => Err(PoolError::SlotBusy { slot }),
                    };
                    match pool.try_acquire_write(slot) {
                        Ok(w) => {
                            prop_assert_eq!(expected, Ok(()));
                            if let Some(old) = writer.replace(w) {
                                model[old.slot()] = SlotState::Free;
                                drop(old);
                            }
                            model[slot] = SlotState::Writing;
                        }
                        Err(e) => prop_assert_eq!(expected, Err(e)),
                    }
                }
                Op::Publish(index) => {
                    if let Some(w) = writer.take() {
                        let slot = w.slot();
                        w.publish(index, 8).unwrap();
                        model[slot] = SlotState::Ready { index, len: 8 };
                    }
                }
                Op::AbandonWrite => {
                    if let Some(w) = writer.take() {
                        model[w.slot()] = SlotState::Free;
                    }
                }
                Op::Read(slot, expected_index) => {
                    let expected = match model.get(slot) {
                        None => Err(PoolError::NoSuchSlot { slot }),
                        Some(SlotState::Ready { index, .. }) if *index == expected_index => Ok(()),
                        Some(SlotState::Ready { index, .. }) => Err(PoolError::OutOfOrder {
                            slot,
                            expected: expected_index,
                            found: *index,
                        }),
                        Some(_) => Err(PoolError::NotReady { slot }),
                    };
                    match pool.try_acquire_read(slot, expected_index) {
                        Ok(r) => {
                            prop_assert_eq!(expected, Ok(()));
                            prop_assert_eq!(r.bytes().len(), 8);
                            if let Some(old) = reader.replace(r) {
                                model[old.slot()] = SlotState::Free;
                                drop(old);
                            }
                            model[slot] = SlotState::Reading { index: expected_index };
                        }
                        Err(e) => prop_assert_eq!(expected, Err(e)),
                    }
                }
                Op::Release => {
                    if let Some(r) = reader.take() {
                        model[r.slot()] = SlotState::Free;
                        r.release();
                    }
                }
            }

            for (slot, state) in model.iter().enumerate() {
                prop_assert_eq!(pool.state(slot).unwrap(), *state);
            }
        }
    }
}
