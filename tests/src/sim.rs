//! Reference interpreter for instruction lists.
//!
//! Executes the ARM subset the mangler emits and consumes, one list at a
//! time, so tests can compare an application sequence with its mangled
//! form on the same starting state.

use std::collections::{BTreeMap, HashMap};

use dbt_core::{
    architectural_pc_for, literal_base_for, AddrMode, Cond, Instr,
    InstrList, IsaMode, MangleConfig, MemRef, MemSize, Opcode, Operand, Reg,
    TlsSlot,
};

/// Runtime TLS base the stolen register holds inside the code cache.
pub const TLS_BASE: u32 = 0x7000_0000;
/// Bytes of TLS area excluded from application-memory comparisons.
pub const TLS_SIZE: u32 = 0x100;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Ran off the end of the list.
    FellThrough,
    /// A taken branch or PC write.
    Branch(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
}

impl Flags {
    pub fn word(self) -> u32 {
        (self.n as u32) << 31
            | (self.z as u32) << 30
            | (self.c as u32) << 29
            | (self.v as u32) << 28
    }

    pub fn from_word(w: u32) -> Self {
        Self {
            n: w & (1 << 31) != 0,
            z: w & (1 << 30) != 0,
            c: w & (1 << 29) != 0,
            v: w & (1 << 28) != 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Machine {
    pub regs: [u32; 16],
    pub flags: Flags,
    pub mem: HashMap<u32, u8>,
    pub isa: IsaMode,
    /// User read-only thread-ID register (the application's TLS base).
    pub tpidruro: u32,
}

/// Content of never-written memory: a fixed function of the address.
fn background(addr: u32) -> u8 {
    (addr as u8) ^ ((addr >> 8) as u8) ^ 0x5a
}

impl Machine {
    pub fn new(isa: IsaMode) -> Self {
        Self {
            regs: [0; 16],
            flags: Flags::default(),
            mem: HashMap::new(),
            isa,
            tpidruro: 0,
        }
    }

    // -- Memory --

    pub fn read_u8(&self, addr: u32) -> u8 {
        self.mem.get(&addr).copied().unwrap_or_else(|| background(addr))
    }

    pub fn write_u8(&mut self, addr: u32, val: u8) {
        self.mem.insert(addr, val);
    }

    pub fn read(&self, addr: u32, bytes: u32) -> u32 {
        (0..bytes).fold(0, |acc, i| {
            acc | (self.read_u8(addr.wrapping_add(i)) as u32) << (8 * i)
        })
    }

    pub fn write(&mut self, addr: u32, bytes: u32, val: u32) {
        for i in 0..bytes {
            self.write_u8(addr.wrapping_add(i), (val >> (8 * i)) as u8);
        }
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        self.read(addr, 4)
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) {
        self.write(addr, 4, val)
    }

    pub fn tls(&self, slot: TlsSlot) -> u32 {
        self.read_u32(TLS_BASE + slot.offset())
    }

    pub fn set_tls(&mut self, slot: TlsSlot, val: u32) {
        self.write_u32(TLS_BASE + slot.offset(), val)
    }

    /// Memory written so far outside the TLS area.
    pub fn app_mem(&self) -> BTreeMap<u32, u8> {
        self.mem
            .iter()
            .filter(|(&a, _)| !(TLS_BASE..TLS_BASE + TLS_SIZE).contains(&a))
            .map(|(&a, &v)| (a, v))
            .collect()
    }

    #[inline]
    pub fn reg(&self, r: Reg) -> u32 {
        self.regs[r.num() as usize]
    }

    #[inline]
    pub fn set(&mut self, r: Reg, val: u32) {
        self.regs[r.num() as usize] = val;
    }

    // -- Code-cache state --

    /// The same application state as seen from inside the code cache: the
    /// stolen register holds the TLS base, its value lives in TLS.
    pub fn to_cache(&self, cfg: &MangleConfig) -> Machine {
        let mut m = self.clone();
        let stolen = cfg.stolen_reg();
        m.set_tls(TlsSlot::Stolen, self.reg(stolen));
        m.set(stolen, TLS_BASE);
        m
    }

    /// Application register file of a code-cache machine.
    pub fn app_regs(&self, cfg: &MangleConfig) -> [u32; 16] {
        let mut regs = self.regs;
        regs[cfg.stolen_reg().num() as usize] = self.tls(TlsSlot::Stolen);
        regs
    }

    // -- Execution --

    pub fn run(&mut self, ilist: &InstrList) -> Stop {
        for instr in ilist.iter() {
            if let Some(target) = self.step(instr) {
                return Stop::Branch(target);
            }
        }
        Stop::FellThrough
    }

    pub fn cond_passed(&self, c: Cond) -> bool {
        let f = self.flags;
        match c {
            Cond::Eq => f.z,
            Cond::Ne => !f.z,
            Cond::Cs => f.c,
            Cond::Cc => !f.c,
            Cond::Mi => f.n,
            Cond::Pl => !f.n,
            Cond::Vs => f.v,
            Cond::Vc => !f.v,
            Cond::Hi => f.c && !f.z,
            Cond::Ls => !f.c || f.z,
            Cond::Ge => f.n == f.v,
            Cond::Lt => f.n != f.v,
            Cond::Gt => !f.z && f.n == f.v,
            Cond::Le => f.z || f.n != f.v,
            Cond::Al => true,
        }
    }

    fn pc(&self, instr: &Instr, literal: bool) -> u32 {
        let pc = instr
            .app_pc
            .unwrap_or_else(|| panic!("runtime code reads the pc: {instr}"));
        if literal {
            literal_base_for(pc, self.isa)
        } else {
            architectural_pc_for(pc, self.isa)
        }
    }

    fn read_reg(&self, instr: &Instr, r: Reg, literal: bool) -> u32 {
        match r {
            Reg::PC => self.pc(instr, literal),
            Reg::Cpsr => self.flags.word(),
            r => self.reg(r),
        }
    }

    fn operand(&self, instr: &Instr, op: &Operand) -> u32 {
        // adr: add/sub with an immediate reads the aligned pc
        let literal = matches!(instr.opcode, Opcode::Add | Opcode::Sub)
            && instr.srcs.iter().any(|s| s.imm().is_some());
        match *op {
            Operand::Reg(r) => self.read_reg(instr, r, literal),
            Operand::ShiftedReg(r, s) => {
                s.apply(self.read_reg(instr, r, false))
            }
            Operand::Imm(v) => v as u32,
            Operand::PcRel(t) => t,
            Operand::Mem(_) => panic!("memory operand used as a value"),
        }
    }

    /// Access address and written-back base of a single transfer.
    fn address(&self, instr: &Instr, m: &MemRef) -> (u32, Option<u32>) {
        // Table branches read the unaligned pc as their base.
        let literal = !matches!(instr.opcode, Opcode::Tbb | Opcode::Tbh);
        let base = self.read_reg(instr, m.base, literal);
        let mut off = m.disp as u32;
        if let Some(idx) = m.index {
            let v = self.read_reg(instr, idx, false);
            off = m.shift.map_or(v, |s| s.apply(v));
        }
        let moved = base.wrapping_add(off);
        match m.mode {
            AddrMode::Offset => (moved, None),
            AddrMode::PreIndex => (moved, Some(moved)),
            AddrMode::PostIndex => (base, Some(moved)),
        }
    }

    /// Write `val` to `r`; a PC write is a branch.
    fn write_reg(&mut self, r: Reg, val: u32) -> Option<u32> {
        match r {
            Reg::PC => Some(val),
            Reg::Cpsr => {
                self.flags = Flags::from_word(val);
                None
            }
            r => {
                self.set(r, val);
                None
            }
        }
    }

    fn dst_reg(instr: &Instr) -> Reg {
        match instr.dsts.first().and_then(|d| d.reg()) {
            Some(r) => r,
            None => panic!("no register destination: {instr}"),
        }
    }

    fn src(&self, instr: &Instr, i: usize) -> u32 {
        self.operand(instr, &instr.srcs[i])
    }

    fn mem_operand(instr: &Instr) -> MemRef {
        instr
            .srcs
            .iter()
            .chain(&instr.dsts)
            .find_map(|op| op.mem())
            .unwrap_or_else(|| panic!("no memory operand: {instr}"))
    }

    fn set_nz(&mut self, v: u32) {
        self.flags.n = v & (1 << 31) != 0;
        self.flags.z = v == 0;
    }

    fn sub_flags(&mut self, a: u32, b: u32) -> u32 {
        let (r, borrow) = a.overflowing_sub(b);
        self.set_nz(r);
        self.flags.c = !borrow;
        self.flags.v = ((a ^ b) & (a ^ r)) >> 31 != 0;
        r
    }

    fn add_flags(&mut self, a: u32, b: u32) -> u32 {
        let (r, carry) = a.overflowing_add(b);
        self.set_nz(r);
        self.flags.c = carry;
        self.flags.v = (!(a ^ b) & (a ^ r)) >> 31 != 0;
        r
    }

    fn return_address(&self, instr: &Instr) -> u32 {
        instr.next_app_pc().unwrap_or(0) | self.isa.mode_bit()
    }

    /// Execute one instruction. Returns the target of a taken branch.
    pub fn step(&mut self, instr: &Instr) -> Option<u32> {
        if instr.opcode.is_marker() {
            return None;
        }
        if let Some(c) = instr.pred {
            if !self.cond_passed(c) {
                return None;
            }
        }
        use Opcode::*;
        match instr.opcode {
            Mov | Movs => {
                let v = self.src(instr, 0);
                self.write_reg(Self::dst_reg(instr), v)
            }
            Mvn => {
                let v = !self.src(instr, 0);
                self.write_reg(Self::dst_reg(instr), v)
            }
            Movw => {
                let v = self.src(instr, 0) & 0xffff;
                self.write_reg(Self::dst_reg(instr), v)
            }
            Movt => {
                let d = Self::dst_reg(instr);
                let v = (self.reg(d) & 0xffff) | (self.src(instr, 0) << 16);
                self.write_reg(d, v)
            }
            Add | Adds | Sub | Subs | Rsb | And | Orr | Eor | Bic | Lsl
            | Lsr | Asr => {
                let a = self.src(instr, 0);
                let b = self.src(instr, 1);
                let v = match instr.opcode {
                    Add => a.wrapping_add(b),
                    Adds => self.add_flags(a, b),
                    Sub => a.wrapping_sub(b),
                    Subs => self.sub_flags(a, b),
                    Rsb => b.wrapping_sub(a),
                    And => a & b,
                    Orr => a | b,
                    Eor => a ^ b,
                    Bic => a & !b,
                    Lsl => a.checked_shl(b).unwrap_or(0),
                    Lsr => a.checked_shr(b).unwrap_or(0),
                    _ => ((a as i32) >> b.min(31)) as u32,
                };
                self.write_reg(Self::dst_reg(instr), v)
            }
            Cmp => {
                let (a, b) = (self.src(instr, 0), self.src(instr, 1));
                self.sub_flags(a, b);
                None
            }
            Tst => {
                let v = self.src(instr, 0) & self.src(instr, 1);
                self.set_nz(v);
                None
            }
            Mrs => {
                let v = self.flags.word();
                self.write_reg(Self::dst_reg(instr), v)
            }
            Msr => {
                let v = self.src(instr, 1);
                self.flags = Flags::from_word(v);
                None
            }
            Mrc => {
                let v = self.tpidruro;
                self.write_reg(Self::dst_reg(instr), v)
            }
            Ldr | Ldrb | Ldrh => {
                let m = Self::mem_operand(instr);
                let (addr, wb) = self.address(instr, &m);
                let v = self.read(addr, m.size.bytes());
                if let Some(b) = wb {
                    self.set(m.base, b);
                }
                self.write_reg(Self::dst_reg(instr), v)
            }
            Str | Strb | Strh => {
                let m = Self::mem_operand(instr);
                let (addr, wb) = self.address(instr, &m);
                let v = self.src(instr, 0);
                self.write(addr, m.size.bytes(), v);
                if let Some(b) = wb {
                    self.set(m.base, b);
                }
                None
            }
            Ldm | Ldmib | Ldmda | Ldmdb | Stm | Stmib | Stmda | Stmdb => {
                self.block_transfer(instr)
            }
            B => Some(self.src(instr, 0)),
            Cbz | Cbnz => {
                let zero = self.src(instr, 1) == 0;
                (zero == (instr.opcode == Cbz)).then(|| self.src(instr, 0))
            }
            Bl => {
                let lr = self.return_address(instr);
                self.set(Reg::LR, lr);
                Some(self.src(instr, 0))
            }
            BlxInd => {
                let target = self.src(instr, 0);
                let lr = self.return_address(instr);
                self.set(Reg::LR, lr);
                Some(target)
            }
            Bx | Bxj => Some(self.src(instr, 0)),
            Tbb | Tbh => {
                let m = Self::mem_operand(instr);
                let (addr, _) = self.address(instr, &m);
                let entry = self.read(addr, m.size.bytes());
                let pc = architectural_pc_for(
                    instr.app_pc.unwrap_or(0),
                    IsaMode::Thumb,
                );
                Some(pc.wrapping_add(2 * entry))
            }
            Svc | Nop | Label | It => None,
            _ => panic!("sim: no semantics for `{instr}`"),
        }
    }

    fn block_transfer(&mut self, instr: &Instr) -> Option<u32> {
        let m = instr.list_mem().expect("block transfer without base");
        let mode = instr.opcode.block_mode().expect("not a block transfer");
        let list = instr.reg_list();
        let n = list.count();
        let base = self.reg(m.base);
        let mut addr = base.wrapping_add(mode.start_offset(n) as u32);
        let mut branch = None;
        if instr.opcode.is_store_multiple() {
            for r in list.iter() {
                let v = self.read_reg(instr, r, false);
                self.write_u32(addr, v);
                addr = addr.wrapping_add(4);
            }
            if m.writeback() {
                let delta = mode.writeback_delta(n) as u32;
                self.set(m.base, base.wrapping_add(delta));
            }
        } else {
            let vals: Vec<(Reg, u32)> = list
                .iter()
                .enumerate()
                .map(|(k, r)| {
                    (r, self.read_u32(addr.wrapping_add(4 * k as u32)))
                })
                .collect();
            if m.writeback() {
                let delta = mode.writeback_delta(n) as u32;
                self.set(m.base, base.wrapping_add(delta));
            }
            for (r, v) in vals {
                if let Some(t) = self.write_reg(r, v) {
                    branch = Some(t);
                }
            }
        }
        debug_assert!(m.size == MemSize::RegList);
        branch
    }
}
