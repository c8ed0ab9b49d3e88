use hashbrown::HashMap;

use crate::{
    cdb::CommonDataBus,
    config::HwConfig,
    cpu::{Cpu, ExecResult, ExitStatus, InstTiming, Stats},
    inst::{AbsPc, Imm, Inst, Op, Reg, Tag, Word},
    mem::{Addr, Memory},
    program::Program,
    rat::RegisterAliasTable,
    regs::RegFile,
    reservation_station::StationPool,
    rob::{Dest, ReorderBuffer, RobEntry, RobState},
};

/// Speculative out-of-order pipeline: Tomasulo's algorithm with a reorder
/// buffer for in-order commit. Each cycle runs Commit, Write, Execute and
/// Issue in that order, so values committed this cycle are visible to this
/// cycle's operand capture, while a result written this cycle wakes its
/// consumers on the next one.
#[derive(Debug, Clone)]
pub struct OutOfOrder {
    prog: Program,
    config: HwConfig,
    regs: RegFile,
    mem: Memory,
    rat: RegisterAliasTable,
    stations: StationPool,
    rob: ReorderBuffer,
    cdb: CommonDataBus,
    pc: AbsPc,
    cycle: u64,
    committed_this_cycle: bool,
    tag_counter: u64,
    stats: Stats,
    trace: Vec<InstTiming>,
    timing_of: HashMap<Tag, usize>,
}

impl Cpu for OutOfOrder {
    fn new(prog: Program, regs: RegFile, mem: Memory, config: HwConfig) -> Self {
        debug_assert!(config.validate(&prog).is_ok());

        Self {
            stations: StationPool::new(&config),
            rob: ReorderBuffer::new(config.rob_size),
            rat: RegisterAliasTable::new(),
            cdb: CommonDataBus::new(),
            pc: AbsPc(config.start_pc),
            cycle: 0,
            committed_this_cycle: false,
            tag_counter: 0,
            stats: Stats::default(),
            trace: Vec::new(),
            timing_of: HashMap::new(),
            prog,
            regs,
            mem,
            config,
        }
    }

    fn exec_all(mut self) -> ExecResult {
        let budget = self.config.budget_for(self.prog.len());

        loop {
            self.tick();

            #[cfg(debug_assertions)]
            if std::env::var("SINGLE_STEP").is_ok() {
                self.dump();
                std::io::stdin().read_line(&mut String::new()).unwrap();
            }

            if self.finished() {
                return self.result(ExitStatus::Completed);
            }
            if self.cycle >= budget {
                return self.result(ExitStatus::BudgetExceeded);
            }
        }
    }
}

impl OutOfOrder {
    fn tick(&mut self) {
        self.cycle += 1;
        self.committed_this_cycle = false;

        // The previous cycle's broadcast becomes visible to waiting stations.
        if let Some(b) = self.cdb.take() {
            self.stations.snoop(b.tag, b.value);
        }

        self.stage_commit();
        self.stage_write();
        self.stage_execute();
        self.stage_issue();
    }

    fn finished(&self) -> bool {
        usize::from(self.pc) >= self.prog.len()
            && self.rob.is_empty()
            && self.stations.all_idle()
            && self.cdb.is_idle()
    }

    fn result(mut self, status: ExitStatus) -> ExecResult {
        self.stats.cycles = self.cycle;

        ExecResult {
            regs: self.regs,
            mem: self.mem,
            stats: self.stats,
            trace: self.trace,
            status,
        }
    }

    #[allow(dead_code)]
    fn dump(&self) {
        dbg!(&self.regs);
        dbg!(&self.rat);
        dbg!(&self.rob);
        dbg!(&self.stations);
        dbg!((self.cycle, self.pc));
    }

    /// Retire the head of the reorder buffer if its value arrived. At most
    /// one instruction leaves per cycle.
    fn stage_commit(&mut self) {
        if !self.rob.head_ready_to_commit() {
            return;
        }

        let entry = self.rob.pop_head().expect("ready ROB head vanished");
        self.committed_this_cycle = true;
        let cycle = self.cycle;
        self.timing_mut(entry.tag).committed.get_or_insert(cycle);
        self.stats.retired += 1;

        match entry.dest {
            Dest::Reg(reg) => {
                self.regs.set(reg, entry.value);
                self.rat.retire(reg, entry.tag);
            }
            Dest::Mem(addr) => {
                let addr = addr.expect("store committed with unresolved address");
                self.mem.write(addr, entry.value);
            }
            Dest::None => {}
        }

        match entry.inst {
            Inst::BranchIfEqual(_, _, taken_pc) => {
                self.stats.branches += 1;
                // Static not-taken prediction: a taken branch is a mispredict.
                if entry.value != 0 {
                    self.stats.mispredicts += 1;
                    self.squash(entry.tag);
                    self.pc = taken_pc;
                }
            }
            Inst::Ret => {
                self.pc = AbsPc(entry.value as u16);
            }
            _ => {}
        }
    }

    /// Roll back all work younger than the mispredicted branch. The branch
    /// itself has already been popped, so everything still younger in the
    /// buffer is wrong-path work.
    pub fn squash(&mut self, tag: Tag) {
        self.rob.kill_tags_after(tag);
        self.stations.kill_tags_after(tag);
        self.rat.kill_tags_after(tag);
        self.cdb.kill_tags_after(tag);
    }

    /// Put one finished result on the bus; the oldest producer wins the
    /// arbitration. The station is released only on a successful broadcast.
    fn stage_write(&mut self) {
        let winner = self
            .stations
            .iter()
            .enumerate()
            .filter(|(_, s)| s.busy && s.result_ready)
            .min_by_key(|(_, s)| s.rob)
            .map(|(idx, s)| (idx, s.rob, s.result));

        let Some((idx, tag, value)) = winner else {
            return;
        };

        let entry = self
            .rob
            .get_mut(tag)
            .expect("broadcasting station has no ROB entry");
        entry.value = value;
        entry.ready = true;
        entry.state = RobState::Written;

        let cycle = self.cycle;
        self.timing_mut(tag).written.get_or_insert(cycle);
        self.cdb.publish(tag, value);
        self.stations.release(idx);
    }

    /// Advance every station whose operands have resolved.
    fn stage_execute(&mut self) {
        for idx in 0..self.stations.len() {
            let s = *self.stations.get(idx);
            if !s.busy || s.result_ready || !s.operands_ready() {
                continue;
            }

            if !s.started && !self.begin_execution(idx) {
                continue;
            }

            let s = self.stations.get_mut(idx);
            s.cycles_left -= 1;
            if s.cycles_left > 0 {
                continue;
            }

            // Final execution cycle: produce the result.
            let s = *self.stations.get(idx);
            let result = match s.class {
                Op::Load => {
                    let addr = s.addr.expect("load finished without an address");
                    self.mem.read(addr)
                }
                Op::Call => {
                    let entry = self.rob.get(s.rob).expect("executing call has no ROB entry");
                    entry.pc.next().0 as Word
                }
                op => op.evaluate(s.vj, s.vk),
            };

            let st = self.stations.get_mut(idx);
            st.result = result;
            st.result_ready = true;
            let cycle = self.cycle;
            self.timing_mut(s.rob).exec_end.get_or_insert(cycle);
        }
    }

    /// First execution cycle for a station: resolve its effective address and,
    /// for loads, hold off until older stores cannot alias it.
    fn begin_execution(&mut self, idx: usize) -> bool {
        let s = *self.stations.get(idx);

        match s.class {
            Op::Load => {
                let addr = Addr::from_base_offset(s.vj, s.offset);
                if self.load_blocked(s.rob, addr) {
                    return false;
                }
                self.stations.get_mut(idx).addr = Some(addr);
            }
            Op::Store => {
                let addr = Addr::from_base_offset(s.vk, s.offset);
                self.stations.get_mut(idx).addr = Some(addr);
                // Publish the address so younger loads can order against it.
                self.rob
                    .get_mut(s.rob)
                    .expect("executing store has no ROB entry")
                    .dest = Dest::Mem(Some(addr));
            }
            _ => {}
        }

        self.stations.get_mut(idx).started = true;
        self.rob
            .get_mut(s.rob)
            .expect("executing station has no ROB entry")
            .state = RobState::Executing;
        let cycle = self.cycle;
        self.timing_mut(s.rob).exec_start.get_or_insert(cycle);

        true
    }

    /// Conservative memory disambiguation: a load may not begin while any
    /// older store could write its address. Committed stores have left the
    /// buffer, so the scan only sees stores still in flight.
    fn load_blocked(&self, load: Tag, addr: Addr) -> bool {
        self.rob.iter().any(|e| {
            e.tag < load
                && e.inst.is_store()
                && match e.dest {
                    Dest::Mem(Some(store_addr)) => store_addr == addr,
                    _ => true,
                }
        })
    }

    /// Dispatch at most one instruction: a ROB slot plus a matching station,
    /// with operands captured through the rename table.
    fn stage_issue(&mut self) {
        let Some(inst) = self.prog.fetch(self.pc).cloned() else {
            return;
        };

        // A pending RET is an unpredicted indirect jump: the front end waits
        // for it to commit before fetching anything else.
        if self.rob.iter().any(|e| matches!(e.inst, Inst::Ret)) {
            return;
        }

        // A slot freed by this cycle's commit only becomes allocatable on the
        // next cycle; the tail pointer sees the head as it was at cycle start.
        let in_flight = self.rob.len() + usize::from(self.committed_this_cycle);
        if in_flight >= self.config.rob_size {
            self.stats.rob_stalls += 1;
            return;
        }

        let op = inst.op();
        let Some(idx) = self.stations.try_acquire(op) else {
            self.stats.rs_stalls += 1;
            return;
        };

        let tag = self.next_tag();
        // Control instructions, and anything issued in the shadow of an
        // unresolved branch or call, run speculatively.
        let speculative = matches!(op, Op::Beq | Op::Call | Op::Ret)
            || self
                .rob
                .iter()
                .any(|e| matches!(e.inst.op(), Op::Beq | Op::Call));

        let (vj, qj, vk, qk, offset) = match &inst {
            Inst::Load(_, src) => {
                let (vj, qj) = self.capture(src.base);
                (vj, qj, 0, None, src.offset)
            }
            Inst::Store(src, dst) => {
                let (vj, qj) = self.capture(*src);
                let (vk, qk) = self.capture(dst.base);
                (vj, qj, vk, qk, dst.offset)
            }
            Inst::BranchIfEqual(a, b, _) => {
                let (vj, qj) = self.capture(*a);
                let (vk, qk) = self.capture(*b);
                (vj, qj, vk, qk, Imm(0))
            }
            Inst::Call(_) => (0, None, 0, None, Imm(0)),
            Inst::Ret => {
                let (vj, qj) = self.capture(Reg::R1);
                (vj, qj, 0, None, Imm(0))
            }
            Inst::Add(_, a, b) | Inst::Nand(_, a, b) | Inst::Mul(_, a, b) => {
                let (vj, qj) = self.capture(*a);
                let (vk, qk) = self.capture(*b);
                (vj, qj, vk, qk, Imm(0))
            }
            Inst::AddImm(_, a, imm) => {
                let (vj, qj) = self.capture(*a);
                (vj, qj, imm.0, None, Imm(0))
            }
        };

        let st = self.stations.get_mut(idx);
        st.vj = vj;
        st.qj = qj;
        st.vk = vk;
        st.qk = qk;
        st.offset = offset;
        st.cycles_left = self.config.latency_of(op);
        st.rob = tag;

        // Rename after capture so an instruction reading its own destination
        // sees the previous producer.
        if let Some(dst) = inst.dest() {
            self.rat.rename(dst, tag);
        }

        let rejected = self.rob.try_push(RobEntry::new(tag, self.pc, inst.clone(), speculative));
        debug_assert!(rejected.is_none());

        let mut timing = InstTiming::new(self.pc, op);
        timing.issued = Some(self.cycle);
        self.timing_of.insert(tag, self.trace.len());
        self.trace.push(timing);

        // Branches fall through under the not-taken predictor; a call's
        // target is known at decode, so the front end follows it at once.
        self.pc = match inst {
            Inst::Call(tgt) => tgt,
            _ => self.pc.next(),
        };
    }

    /// Issue-side operand capture: the architectural value, a finished
    /// in-flight value read out of the ROB, or the producer's tag to wait on.
    fn capture(&self, reg: Reg) -> (Word, Option<Tag>) {
        if reg == Reg::R0 {
            return (0, None);
        }

        match self.rat.get(reg) {
            Some(p) => {
                let entry = self.rob.get(p).expect("rename table names a dead entry");
                if entry.ready {
                    (entry.value, None)
                } else {
                    (0, Some(p))
                }
            }
            None => (self.regs.get(reg), None),
        }
    }

    fn next_tag(&mut self) -> Tag {
        let tag = Tag::from(self.tag_counter);
        self.tag_counter += 1;
        tag
    }

    fn timing_mut(&mut self, tag: Tag) -> &mut InstTiming {
        let idx = self.timing_of[&tag];
        &mut self.trace[idx]
    }
}
