//! Pipeline-specific behavior of the out-of-order model: stage timing,
//! speculation and rollback, structural stalls, and the cycle budget.

use tomasim::{
    config::HwConfig,
    cpu::{Cpu, ExecResult, ExitStatus, InstTiming},
    inst::{Op, Reg},
    mem::{Addr, Memory},
    out_of_order::OutOfOrder,
    program::Program,
    regs::RegFile,
};

fn run(src: &str) -> ExecResult {
    run_with(src, RegFile::new(), Memory::new(), HwConfig::default())
}

fn run_with(src: &str, regs: RegFile, mem: Memory, config: HwConfig) -> ExecResult {
    let prog = src.parse::<Program>().expect("bad test program");
    config.validate(&prog).expect("bad test config");
    OutOfOrder::new(prog, regs, mem, config).exec_all()
}

fn assert_stamps_ordered(t: &InstTiming) {
    let stamps = [t.issued, t.exec_start, t.exec_end, t.written, t.committed];
    let present = stamps.iter().filter_map(|&s| s).collect::<Vec<_>>();
    assert!(
        present.windows(2).all(|w| w[0] <= w[1]),
        "stage stamps out of order: {t:?}"
    );
}

#[test]
fn add_chain_timing() {
    let res = run("addi r1, r0, 5\naddi r2, r0, 7\nadd r3, r1, r2\n");

    let stamps = res
        .trace
        .iter()
        .map(|t| {
            (
                t.issued.unwrap(),
                t.exec_start.unwrap(),
                t.exec_end.unwrap(),
                t.written.unwrap(),
                t.committed.unwrap(),
            )
        })
        .collect::<Vec<_>>();

    // The two addis overlap; the add waits for both broadcasts.
    assert_eq!(stamps, vec![(1, 2, 3, 4, 5), (2, 3, 4, 5, 6), (3, 6, 7, 8, 9)]);
    assert_eq!(res.stats.cycles, 9);
    assert_eq!(res.regs.get(Reg::R3), 12);
}

#[test]
fn stage_stamps_are_monotonic() {
    let programs = [
        "addi r1, r0, 8\naddi r2, r0, 99\nstore r2, 0(r1)\nload r3, 0(r1)\n",
        "addi r1, r0, 3\naddi r2, r0, 3\nbeq r1, r2, end\naddi r3, r0, 5\nend:\naddi r4, r0, 9\n",
        "addi r1, r0, 6\naddi r2, r0, 7\nmul r3, r1, r2\n",
    ];

    for src in programs {
        let res = run(src);
        for t in &res.trace {
            assert_stamps_ordered(t);
        }
    }
}

#[test]
fn execution_spans_the_configured_latency() {
    let config = HwConfig::default();
    let programs = [
        "addi r1, r0, 6\naddi r2, r0, 7\nmul r3, r1, r2\n",
        "addi r1, r0, 8\naddi r2, r0, 99\nstore r2, 0(r1)\nload r3, 0(r1)\n",
        "call func\nbeq r0, r0, end\nfunc:\nret\nend:\n",
    ];

    for src in programs {
        let res = run(src);
        for t in &res.trace {
            if let (Some(start), Some(end)) = (t.exec_start, t.exec_end) {
                assert_eq!(
                    end - start + 1,
                    config.latency_of(t.op),
                    "wrong occupancy for {:?}",
                    t
                );
            }
        }
    }
}

#[test]
fn load_result_wakes_consumer_after_write() {
    let res = run_with(
        "addi r1, r0, 4\nload r2, 0(r1)\nadd r3, r2, r2\n",
        RegFile::new(),
        Memory::from([(4, 42)]),
        HwConfig::default(),
    );

    assert_eq!(res.regs.get(Reg::R3), 84);

    let load = &res.trace[1];
    let add = &res.trace[2];
    assert_eq!(load.op, Op::Load);
    assert!(add.exec_start.unwrap() >= load.written.unwrap());
}

#[test]
fn taken_branch_squashes_wrong_path() {
    let res =
        run("addi r1, r0, 3\naddi r2, r0, 3\nbeq r1, r2, end\naddi r3, r0, 5\nend:\naddi r4, r0, 9\n");

    assert_eq!(res.stats.branches, 1);
    assert_eq!(res.stats.mispredicts, 1);
    assert_eq!(res.stats.retired, 4);
    assert_eq!(res.regs.get(Reg::R3), 0);
    assert_eq!(res.regs.get(Reg::R4), 9);

    // Wrong-path instructions issued but never committed; the re-fetched
    // target got a fresh record that did.
    assert_eq!(res.trace.len(), 6);
    let squashed_addi = &res.trace[3];
    assert!(squashed_addi.issued.is_some());
    assert_eq!(squashed_addi.committed, None);
    assert_eq!(res.trace[4].committed, None);
    assert!(res.trace[5].committed.is_some());
}

#[test]
fn rob_size_one_serializes_execution() {
    let mut config = HwConfig::default();
    config.rob_size = 1;

    let res = run_with(
        "addi r1, r0, 5\naddi r2, r0, 7\nadd r3, r1, r2\n",
        RegFile::new(),
        Memory::new(),
        config,
    );

    assert_eq!(res.regs.get(Reg::R3), 12);
    assert!(res.stats.rob_stalls > 0);

    // One instruction in flight at a time: each issue waits out the previous
    // commit, bounding throughput by 1 / (latency + 3).
    for pair in res.trace.windows(2) {
        assert!(pair[1].issued.unwrap() > pair[0].committed.unwrap());
    }
    assert!(res.stats.ipc() <= 1.0 / (2.0 + 3.0) + f64::EPSILON);
}

#[test]
fn saturated_station_class_stalls_issue() {
    let mut config = HwConfig::default();
    config.stations.insert(Op::Addi, 1);

    let res = run_with(
        "addi r2, r0, 1\naddi r3, r0, 2\naddi r4, r0, 3\n",
        RegFile::new(),
        Memory::new(),
        config,
    );

    assert_eq!(res.regs.get(Reg::R2), 1);
    assert_eq!(res.regs.get(Reg::R3), 2);
    assert_eq!(res.regs.get(Reg::R4), 3);
    assert!(res.stats.rs_stalls > 0);
    assert_eq!(res.stats.cycles, 11);
}

#[test]
fn runaway_program_hits_cycle_budget() {
    let res = run("loop:\nbeq r0, r0, loop\n");

    assert_eq!(res.status, ExitStatus::BudgetExceeded);
    assert_eq!(res.stats.cycles, 10);
    assert!(res.stats.retired >= 1);
    assert!(res.stats.mispredicts >= 1);
    // Partial metrics are still coherent.
    assert_eq!(res.stats.branches, res.stats.mispredicts);
}

#[test]
fn empty_program_halts_in_one_cycle() {
    let res = run("");

    assert_eq!(res.status, ExitStatus::Completed);
    assert_eq!(res.stats.cycles, 1);
    assert_eq!(res.stats.retired, 0);
    assert_eq!(res.stats.branches, 0);
    assert_eq!(res.stats.ipc(), 0.0);
    assert_eq!(res.stats.mispredict_rate(), None);
    assert!(res.trace.is_empty());
}

#[test]
fn reruns_are_deterministic() {
    let src = "addi r1, r0, 3\naddi r2, r0, 3\nbeq r1, r2, end\naddi r3, r0, 5\nend:\naddi r4, r0, 9\n";

    let a = run(src);
    let b = run(src);
    assert_eq!(a.stats, b.stats);
    assert_eq!(a.trace, b.trace);
    assert_eq!(a.regs, b.regs);
    assert_eq!(a.mem, b.mem);
}

#[test]
fn final_state_round_trips_through_serde() {
    let res = run("addi r1, r0, 8\naddi r2, r0, 99\nstore r2, 0(r1)\nload r3, 0(r1)\n");
    assert_eq!(res.mem.read(Addr(8)), 99);

    let regs = serde_json::to_string(&res.regs).unwrap();
    let mem = serde_json::to_string(&res.mem).unwrap();
    assert_eq!(serde_json::from_str::<RegFile>(&regs).unwrap(), res.regs);
    assert_eq!(serde_json::from_str::<Memory>(&mem).unwrap(), res.mem);
}

#[test]
fn writes_to_r0_are_dropped() {
    let res = run("addi r0, r0, 5\nadd r2, r0, r0\n");

    assert_eq!(res.regs.get(Reg::R0), 0);
    assert_eq!(res.regs.get(Reg::R2), 0);
}
