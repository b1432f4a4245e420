//! End-to-end scenarios: a sending controller's frames cross a lossy wire
//! into a receiving controller, redundancy adapts to link conditions, and
//! GC retires old state.

use braid_control::{FecConfig, FecController, FecStrategy, PathState};
use braid_fec::FecFrame;

fn path(path_id: u32, rtt_ms: f64, loss_rate: f64, bandwidth_mbps: f64) -> PathState {
    PathState {
        path_id,
        rtt_ms,
        loss_rate,
        bandwidth_mbps,
        ..PathState::default()
    }
}

fn controller(cfg: FecConfig) -> FecController {
    let c = FecController::new(cfg).unwrap();
    c.add_path(0, path(0, 20.0, 0.01, 100.0));
    c.add_path(1, path(1, 60.0, 0.03, 50.0));
    c.update_loss_correlation(0, 1, 0.02);
    c
}

#[test]
fn recovers_payloads_across_a_lossy_wire() {
    let cfg = FecConfig {
        k: 4,
        m: 2,
        block_size: 32,
        ..FecConfig::default()
    };
    let sender = controller(cfg.clone());
    let receiver = controller(cfg);

    // Fill one group: payloads are recovered zero-padded to block size.
    let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i + 1; 20]).collect();
    let mut metas = Vec::new();
    for p in &payloads {
        metas.extend(sender.send_stream_data(p, 0).unwrap());
    }
    assert_eq!(metas.len(), 7); // params + 4 source + 2 repair

    // Serialize, lose the source frames for blocks 0 and 2 in transit.
    let mut recovered = Vec::new();
    for meta in &metas {
        let header = &meta.frame.header;
        if !meta.frame.is_params() && !meta.is_repair && (header.block_index % 2 == 0) {
            continue; // lost
        }
        let wire = meta.to_wire();
        let frame = FecFrame::decode(&mut &wire[..]).unwrap();
        recovered.extend(receiver.receive_fec_frame(&frame, meta.path_id));
    }

    assert_eq!(recovered.len(), 4);
    for (i, block) in recovered.iter().enumerate() {
        let mut expected = vec![i as u8 + 1; 20];
        expected.resize(32, 0);
        assert_eq!(block, &expected, "block {i}");
    }
    assert_eq!(receiver.stats().packets_recovered, 4);
}

#[test]
fn decision_crosses_source_and_repair_paths() {
    let cfg = FecConfig {
        periodic_min_interval_ms: 0,
        ..FecConfig::default()
    };
    let c = controller(cfg);
    c.periodic_update().unwrap();

    let decision = c.decision();
    assert_eq!(decision.source_path, 0, "path 0 has lower rtt and loss");
    assert_eq!(decision.repair_path, 1);
}

#[test]
fn aggressive_strategy_raises_the_redundancy_floor() {
    let cfg = FecConfig {
        periodic_min_interval_ms: 0,
        ..FecConfig::default()
    };
    let c = controller(cfg);

    // A path at 20% loss makes the selector go aggressive.
    c.update_path_state(path(1, 60.0, 0.20, 50.0));
    assert_eq!(c.recommended_strategy(), FecStrategy::Aggressive);

    c.set_fec_strategy(FecStrategy::Aggressive);
    c.periodic_update().unwrap();
    let decision = c.decision();
    assert!(
        decision.m as f64 / decision.k as f64 >= 0.4,
        "band [0.4, 1.0] must bound the decision, got {}/{}",
        decision.m,
        decision.k
    );
}

#[test]
fn gc_retires_old_mappings_and_keeps_recent_ones() {
    let cfg = FecConfig {
        k: 1,
        m: 1,
        block_size: 16,
        periodic_min_interval_ms: 0,
        ..FecConfig::default()
    };
    let c = controller(cfg);

    // Every payload seals a (k=1) group: ids 1..=1500.
    for i in 0..1500u32 {
        let metas = c.send_stream_data(&i.to_be_bytes(), 0).unwrap();
        assert!(!metas.is_empty());
    }
    assert_eq!(c.stats().groups_created, 1500);
    assert!(!c.mappings_for_group(500).is_empty());

    // groups_created (1500) > trigger (1000): GC drops ids below 1000.
    c.periodic_update().unwrap();
    assert!(c.mappings_for_group(500).is_empty());
    assert!(!c.mappings_for_group(1200).is_empty());
}

#[test]
fn group_ids_increase_monotonically_on_the_wire() {
    let cfg = FecConfig {
        k: 2,
        m: 1,
        block_size: 8,
        ..FecConfig::default()
    };
    let c = controller(cfg);

    let mut seen = Vec::new();
    for i in 0..10u8 {
        for meta in c.send_stream_data(&[i], 0).unwrap() {
            if !meta.frame.is_params() && !meta.is_repair && meta.frame.header.block_index == 0 {
                seen.push(meta.frame.header.group_id);
            }
        }
    }
    assert_eq!(seen.len(), 5);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn periodic_param_change_announces_and_flushes() {
    let cfg = FecConfig {
        k: 4,
        m: 2,
        block_size: 16,
        periodic_min_interval_ms: 0,
        ..FecConfig::default()
    };
    let c = controller(cfg);

    // Two payloads sit in a partial group; the periodic decision moves
    // (k, m), which must flush and emit them rather than drop them.
    c.send_stream_data(b"pending-1", 0).unwrap();
    c.send_stream_data(b"pending-2", 0).unwrap();

    let metas = c.periodic_update().unwrap();
    let decision = c.decision();
    assert_ne!((decision.k, decision.m), (4, 2), "low loss shrinks redundancy");

    // params + 4 source (2 zero-padded) + 2 repair, under the old (4, 2).
    assert_eq!(metas.len(), 7);
    let data_frames: Vec<_> = metas.iter().filter(|m| !m.frame.is_params()).collect();
    assert!(data_frames
        .iter()
        .all(|m| m.frame.header.total_blocks == 6));
    assert_eq!(c.stats().groups_flushed, 1);

    // The next completed group is announced under the new parameters.
    let mut announced = None;
    for i in 0..decision.k as u8 {
        for meta in c.send_stream_data(&[i], 0).unwrap() {
            if meta.frame.is_params() {
                announced = Some((
                    meta.frame.header.block_index,
                    meta.frame.header.total_blocks,
                ));
            }
        }
    }
    assert_eq!(announced, Some((decision.k, decision.k + decision.m)));
}
