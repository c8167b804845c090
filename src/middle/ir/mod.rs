//! The SSA intermediate representation. Every cross-reference is a packed
//! 32-bit [`IrIndex`] carrying a 4-bit kind tag and a 28-bit payload; a
//! function's entities live in parallel arenas owned by the function, with
//! small vectors (successors, predecessors, phi arguments, user sets)
//! appended into a shared u32 pool.

use bitflags::bitflags;

use crate::{
    frontend::{ast::AstIndex, ast::BasicTypeKind, intern::IdentId},
    index::{simple_index, IndexVec},
};

pub mod ast_lowering;
pub mod builder;
pub mod pretty_print;

#[cfg(test)]
mod builder_tests;

simple_index! {
    /// Handle to an instruction header within a function
    pub struct InstrIndex;
}

simple_index! {
    /// Handle to a phi within a function
    pub struct PhiIndex;
}

simple_index! {
    /// Handle to a virtual register within a function
    pub struct VregIndex;
}

simple_index! {
    /// Handle to a basic block within a function. Index 0 is always the entry
    /// block and index 1 the exit block.
    pub struct BlockIndex;
}

simple_index! {
    pub struct IrFuncIndex;
}

simple_index! {
    pub struct IrGlobalIndex;
}

simple_index! {
    pub struct IrConstantIndex;
}

simple_index! {
    pub struct IrAggregateIndex;
}

simple_index! {
    pub struct StackSlotIndex;
}

/// Kind tag of an [`IrIndex`], stored in its top four bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrKind {
    None = 0,
    BasicBlock,
    Instruction,
    Phi,
    VirtReg,
    PhysReg,
    /// Small constant whose sign/zero-extended value lives in the payload
    ConstantSmall,
    Constant,
    ConstantAggregate,
    ConstantZero,
    Type,
    StackSlot,
    Global,
    Variable,
    Function,
    Array,
}

const KINDS: [IrKind; 16] = [
    IrKind::None,
    IrKind::BasicBlock,
    IrKind::Instruction,
    IrKind::Phi,
    IrKind::VirtReg,
    IrKind::PhysReg,
    IrKind::ConstantSmall,
    IrKind::Constant,
    IrKind::ConstantAggregate,
    IrKind::ConstantZero,
    IrKind::Type,
    IrKind::StackSlot,
    IrKind::Global,
    IrKind::Variable,
    IrKind::Function,
    IrKind::Array,
];

/// Universal packed 32-bit IR handle: 4-bit kind tag + 28-bit payload. The
/// zero value is "undefined".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrIndex(pub u32);

const PAYLOAD_BITS: u32 = 28;
const PAYLOAD_MASK: u32 = (1 << PAYLOAD_BITS) - 1;

impl IrIndex {
    pub const NONE: Self = Self(0);

    pub fn new(kind: IrKind, payload: u32) -> Self {
        debug_assert!(payload <= PAYLOAD_MASK);
        Self(((kind as u32) << PAYLOAD_BITS) | payload)
    }

    pub fn kind(self) -> IrKind {
        KINDS[(self.0 >> PAYLOAD_BITS) as usize]
    }

    pub fn payload(self) -> u32 {
        self.0 & PAYLOAD_MASK
    }

    pub fn is_defined(self) -> bool {
        self.0 != 0
    }

    /* Constructors per kind */

    pub fn block(index: BlockIndex) -> Self {
        Self::new(IrKind::BasicBlock, index.0)
    }

    pub fn instruction(index: InstrIndex) -> Self {
        Self::new(IrKind::Instruction, index.0)
    }

    pub fn phi(index: PhiIndex) -> Self {
        Self::new(IrKind::Phi, index.0)
    }

    pub fn virt_reg(index: VregIndex) -> Self {
        Self::new(IrKind::VirtReg, index.0)
    }

    /// Physical registers repack the payload into class/size/index subfields
    pub fn phys_reg(class: u32, size: u32, index: u32) -> Self {
        debug_assert!(class < 16 && size < 16 && index < (1 << 20));
        Self::new(IrKind::PhysReg, (class << 24) | (size << 20) | index)
    }

    pub fn phys_reg_class(self) -> u32 {
        debug_assert_eq!(self.kind(), IrKind::PhysReg);
        (self.payload() >> 24) & 0xF
    }

    pub fn phys_reg_size(self) -> u32 {
        debug_assert_eq!(self.kind(), IrKind::PhysReg);
        (self.payload() >> 20) & 0xF
    }

    pub fn phys_reg_index(self) -> u32 {
        debug_assert_eq!(self.kind(), IrKind::PhysReg);
        self.payload() & 0xF_FFFF
    }

    /// Small constant: 24-bit two's-complement value + 4-bit basic type
    pub fn small_constant(value: i64, basic: BasicTypeKind) -> Option<Self> {
        const MIN: i64 = -(1 << 23);
        const MAX: i64 = (1 << 23) - 1;

        if !(MIN..=MAX).contains(&value) {
            return None;
        }

        let bits = (value as u32) & 0x00FF_FFFF;
        Some(Self::new(
            IrKind::ConstantSmall,
            ((basic as u32) << 24) | bits,
        ))
    }

    pub fn small_constant_type(self) -> BasicTypeKind {
        debug_assert_eq!(self.kind(), IrKind::ConstantSmall);
        BasicTypeKind::ALL[(self.payload() >> 24) as usize]
    }

    /// Sign- or zero-extends the inline value according to the basic type
    pub fn small_constant_value(self) -> i64 {
        let bits = self.payload() & 0x00FF_FFFF;

        if self.small_constant_type().is_signed() {
            // Sign-extend from 24 bits
            ((bits << 8) as i32 >> 8) as i64
        } else {
            bits as i64
        }
    }

    pub fn constant(index: IrConstantIndex) -> Self {
        Self::new(IrKind::Constant, index.0)
    }

    pub fn aggregate(index: IrAggregateIndex) -> Self {
        Self::new(IrKind::ConstantAggregate, index.0)
    }

    pub fn zero(ty: IrType) -> Self {
        Self::new(IrKind::ConstantZero, ty.0)
    }

    pub fn zero_type(self) -> IrType {
        debug_assert_eq!(self.kind(), IrKind::ConstantZero);
        IrType(self.payload())
    }

    pub fn typ(ty: IrType) -> Self {
        Self::new(IrKind::Type, ty.0)
    }

    pub fn type_payload(self) -> IrType {
        debug_assert_eq!(self.kind(), IrKind::Type);
        IrType(self.payload())
    }

    pub fn stack_slot(index: u32) -> Self {
        Self::new(IrKind::StackSlot, index)
    }

    pub fn global(index: IrGlobalIndex) -> Self {
        Self::new(IrKind::Global, index.0)
    }

    pub fn variable(index: u32) -> Self {
        Self::new(IrKind::Variable, index)
    }

    pub fn function(index: IrFuncIndex) -> Self {
        Self::new(IrKind::Function, index.0)
    }

    pub fn array(index: u32) -> Self {
        Self::new(IrKind::Array, index)
    }

    pub fn as_block(self) -> BlockIndex {
        debug_assert_eq!(self.kind(), IrKind::BasicBlock);
        BlockIndex(self.payload())
    }

    pub fn as_instr(self) -> InstrIndex {
        debug_assert_eq!(self.kind(), IrKind::Instruction);
        InstrIndex(self.payload())
    }

    pub fn as_phi(self) -> PhiIndex {
        debug_assert_eq!(self.kind(), IrKind::Phi);
        PhiIndex(self.payload())
    }

    pub fn as_vreg(self) -> VregIndex {
        debug_assert_eq!(self.kind(), IrKind::VirtReg);
        VregIndex(self.payload())
    }
}

impl core::fmt::Debug for IrIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            IrKind::None => write!(f, "undef"),
            IrKind::BasicBlock => write!(f, "@{}", self.payload()),
            IrKind::Instruction => write!(f, "i{}", self.payload()),
            IrKind::Phi => write!(f, "phi{}", self.payload()),
            IrKind::VirtReg => write!(f, "%{}", self.payload()),
            IrKind::PhysReg => write!(
                f,
                "r{}c{}s{}",
                self.phys_reg_index(),
                self.phys_reg_class(),
                self.phys_reg_size()
            ),
            IrKind::ConstantSmall => {
                write!(f, "{}_{}", self.small_constant_value(), self.small_constant_type())
            }
            IrKind::Constant => write!(f, "const{}", self.payload()),
            IrKind::ConstantAggregate => write!(f, "aggr{}", self.payload()),
            IrKind::ConstantZero => write!(f, "zero"),
            IrKind::Type => write!(f, "ty{}", self.payload()),
            IrKind::StackSlot => write!(f, "slot{}", self.payload()),
            IrKind::Global => write!(f, "g{}", self.payload()),
            IrKind::Variable => write!(f, "var{}", self.payload()),
            IrKind::Function => write!(f, "fn{}", self.payload()),
            IrKind::Array => write!(f, "arr{}", self.payload()),
        }
    }
}

/// Kind of a packed IR type, stored in bits 24..28 of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrTypeKind {
    Basic = 0,
    Pointer,
    Slice,
    StaticArray,
    FuncSig,
    Struct,
    Enum,
}

const TYPE_KINDS: [IrTypeKind; 7] = [
    IrTypeKind::Basic,
    IrTypeKind::Pointer,
    IrTypeKind::Slice,
    IrTypeKind::StaticArray,
    IrTypeKind::FuncSig,
    IrTypeKind::Struct,
    IrTypeKind::Enum,
];

/// Packed 28-bit IR type: 4-bit type kind + 24-bit index. Basic types store
/// the basic kind directly; the rest store the canonical type node index.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrType(pub u32);

impl IrType {
    pub fn basic(basic: BasicTypeKind) -> Self {
        Self(basic as u32)
    }

    pub fn node(kind: IrTypeKind, node: AstIndex) -> Self {
        debug_assert!(node.0 < (1 << 24));
        Self(((kind as u32) << 24) | node.0)
    }

    pub fn kind(self) -> IrTypeKind {
        TYPE_KINDS[(self.0 >> 24) as usize]
    }

    pub fn basic_kind(self) -> Option<BasicTypeKind> {
        (self.kind() == IrTypeKind::Basic).then(|| BasicTypeKind::ALL[(self.0 & 0xFF) as usize])
    }

    pub fn node_index(self) -> AstIndex {
        debug_assert_ne!(self.kind(), IrTypeKind::Basic);
        AstIndex(self.0 & 0x00FF_FFFF)
    }
}

impl core::fmt::Debug for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            IrTypeKind::Basic => write!(f, "{}", self.basic_kind().unwrap()),
            kind => write!(f, "{kind:?}({})", self.node_index().0),
        }
    }
}

/// Reference into a function's shared small-array pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrSmallArray {
    pub offset: u32,
    pub len: u32,
    pub cap: u32,
}

impl IrSmallArray {
    pub const EMPTY: Self = Self {
        offset: 0,
        len: 0,
        cap: 0,
    };
}

/// Shared append-only u32 pool backing every small vector of a function.
/// Growing an array relocates it to the end of the pool; the stale storage is
/// simply abandoned.
#[derive(Debug, Default)]
pub struct IrSmallArrayPool {
    data: Vec<u32>,
}

impl IrSmallArrayPool {
    pub fn items(&self, array: IrSmallArray) -> &[u32] {
        &self.data[array.offset as usize..(array.offset + array.len) as usize]
    }

    pub fn handles(&self, array: IrSmallArray) -> impl Iterator<Item = IrIndex> + '_ {
        self.items(array).iter().map(|raw| IrIndex(*raw))
    }

    pub fn get(&self, array: IrSmallArray, index: usize) -> IrIndex {
        IrIndex(self.data[array.offset as usize + index])
    }

    pub fn set(&mut self, array: IrSmallArray, index: usize, value: IrIndex) {
        self.data[array.offset as usize + index] = value.0;
    }

    pub fn push(&mut self, array: &mut IrSmallArray, value: IrIndex) {
        if array.len == array.cap {
            let new_cap = (array.cap * 2).max(4);
            let new_offset = self.data.len() as u32;

            self.data.reserve(new_cap as usize);
            for i in 0..array.len {
                let item = self.data[(array.offset + i) as usize];
                self.data.push(item);
            }
            self.data
                .resize(new_offset as usize + new_cap as usize, 0);

            array.offset = new_offset;
            array.cap = new_cap;
        }

        self.data[(array.offset + array.len) as usize] = value.0;
        array.len += 1;
    }

    /// Removes one occurrence of `value` (order is not preserved)
    pub fn remove_one(&mut self, array: &mut IrSmallArray, value: IrIndex) -> bool {
        let start = array.offset as usize;
        let end = start + array.len as usize;

        for i in start..end {
            if self.data[i] == value.0 {
                self.data[i] = self.data[end - 1];
                array.len -= 1;
                return true;
            }
        }

        false
    }

    /// Replaces every occurrence of `old` with `new`, returning the count
    pub fn replace_all(&mut self, array: IrSmallArray, old: IrIndex, new: IrIndex) -> usize {
        let start = array.offset as usize;
        let end = start + array.len as usize;
        let mut replaced = 0;

        for slot in &mut self.data[start..end] {
            if *slot == old.0 {
                *slot = new.0;
                replaced += 1;
            }
        }

        replaced
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InstrFlags: u8 {
        const HAS_RESULT = 1 << 0;
        const IS_GENERIC = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u8 {
        const SEALED      = 1 << 0;
        const FINISHED    = 1 << 1;
        const LOOP_HEADER = 1 << 2;
        const VISITED     = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VregFlags: u8 {
        const REMOVED = 1 << 0;
    }
}

/// Target-agnostic instruction set; a lowered backend-specific set would get
/// its own tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrInstrSet {
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOpcode {
    /// Materializes the n-th incoming function parameter
    Param,
    Mov,
    Load,
    Store,
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    Sar,
    Shr,
    Not,
    Neg,
    Cmp,
    /// Pointer plus byte offset
    PtrOffset,
    ZExt,
    SExt,
    Trunc,
    Bitcast,
    Call,
    Syscall,
    /* Terminators */
    Jump,
    BranchUnary,
    BranchBinary,
    Ret,
    RetVal,
    Unreachable,
}

impl IrOpcode {
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jump
                | Self::BranchUnary
                | Self::BranchBinary
                | Self::Ret
                | Self::RetVal
                | Self::Unreachable
        )
    }
}

/// Condition codes for `Cmp` / branches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrCond {
    None,
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
    /// Unary branch conditions
    Zero,
    NotZero,
}

/// Operation width in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrArgSize {
    S8,
    S16,
    S32,
    S64,
}

impl IrArgSize {
    pub fn from_byte_size(bytes: u32) -> Self {
        match bytes {
            0 | 1 => Self::S8,
            2 => Self::S16,
            3 | 4 => Self::S32,
            _ => Self::S64,
        }
    }
}

/// Fixed-size instruction header; arguments and the optional result live at
/// `payload_offset` in the function's payload arena, result first
#[derive(Debug, Clone, Copy)]
pub struct InstrHeader {
    pub op: IrOpcode,
    pub cond: IrCond,
    pub arg_size: IrArgSize,
    pub payload_offset: u32,
    pub num_args: u8,
    pub flags: InstrFlags,
}

#[derive(Debug)]
pub struct IrBasicBlock {
    pub first_instr: IrIndex,
    pub last_instr: IrIndex,
    pub prev_block: IrIndex,
    pub next_block: IrIndex,
    pub first_phi: IrIndex,
    pub successors: IrSmallArray,
    pub predecessors: IrSmallArray,
    pub flags: BlockFlags,
}

impl IrBasicBlock {
    fn new() -> Self {
        Self {
            first_instr: IrIndex::NONE,
            last_instr: IrIndex::NONE,
            prev_block: IrIndex::NONE,
            next_block: IrIndex::NONE,
            first_phi: IrIndex::NONE,
            successors: IrSmallArray::EMPTY,
            predecessors: IrSmallArray::EMPTY,
            flags: BlockFlags::default(),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.flags.contains(BlockFlags::SEALED)
    }

    pub fn is_finished(&self) -> bool {
        self.flags.contains(BlockFlags::FINISHED)
    }
}

#[derive(Debug)]
pub struct IrPhi {
    pub block: IrIndex,
    pub result: IrIndex,
    /// The SSA variable this phi merges
    pub var: IrIndex,
    /// Positionally parallel to the block's predecessor list
    pub args: IrSmallArray,
    pub prev_phi: IrIndex,
    pub next_phi: IrIndex,
}

#[derive(Debug)]
pub struct IrVirtReg {
    pub definition: IrIndex,
    pub ty: IrType,
    pub users: IrSmallArray,
    pub flags: VregFlags,
}

impl IrVirtReg {
    pub fn is_removed(&self) -> bool {
        self.flags.contains(VregFlags::REMOVED)
    }
}

#[derive(Debug)]
pub struct IrStackSlot {
    pub ty: IrType,
    pub size: u32,
    pub align: u32,
}

/// A function's IR: eight parallel arenas plus its type handle and
/// instruction-set tag
#[derive(Debug)]
pub struct IrFunction {
    pub name: IdentId,
    /// Function-signature type handle
    pub signature: AstIndex,
    pub instr_set: IrInstrSet,

    pub instructions: IndexVec<InstrIndex, InstrHeader>,
    pub payload: Vec<IrIndex>,
    pub next_instr: Vec<IrIndex>,
    pub prev_instr: Vec<IrIndex>,
    pub phis: IndexVec<PhiIndex, IrPhi>,
    pub virt_regs: IndexVec<VregIndex, IrVirtReg>,
    pub blocks: IndexVec<BlockIndex, IrBasicBlock>,
    pub arrays: IrSmallArrayPool,

    pub stack_slots: IndexVec<StackSlotIndex, IrStackSlot>,
    /// Types of the function's SSA variables, indexed by variable payload
    pub variable_types: Vec<IrType>,
    pub num_removed_vregs: u32,
}

impl IrFunction {
    pub const ENTRY: BlockIndex = BlockIndex(0);
    pub const EXIT: BlockIndex = BlockIndex(1);

    pub fn new(name: IdentId, signature: AstIndex) -> Self {
        Self {
            name,
            signature,
            instr_set: IrInstrSet::Generic,
            instructions: IndexVec::new(),
            payload: Vec::new(),
            next_instr: Vec::new(),
            prev_instr: Vec::new(),
            phis: IndexVec::new(),
            virt_regs: IndexVec::new(),
            blocks: IndexVec::new(),
            arrays: IrSmallArrayPool::default(),
            stack_slots: IndexVec::new(),
            variable_types: Vec::new(),
            num_removed_vregs: 0,
        }
    }

    pub fn block(&self, index: IrIndex) -> &IrBasicBlock {
        &self.blocks[index.as_block()]
    }

    pub fn block_mut(&mut self, index: IrIndex) -> &mut IrBasicBlock {
        &mut self.blocks[index.as_block()]
    }

    /// Appends a block, linking it into the layout list just before the exit
    /// block (or at the end while entry/exit are being created)
    pub fn add_block(&mut self) -> IrIndex {
        let handle = IrIndex::block(self.blocks.next_index());
        self.blocks.push(IrBasicBlock::new());

        if self.blocks.len() <= 2 {
            // Entry and exit; link entry -> exit
            if self.blocks.len() == 2 {
                self.blocks[Self::ENTRY].next_block = handle;
                self.blocks[Self::EXIT].prev_block = IrIndex::block(Self::ENTRY);
            }
            return handle;
        }

        let exit = IrIndex::block(Self::EXIT);
        let before = self.blocks[Self::EXIT].prev_block;

        self.block_mut(before).next_block = handle;
        self.block_mut(handle).prev_block = before;
        self.block_mut(handle).next_block = exit;
        self.blocks[Self::EXIT].prev_block = handle;

        handle
    }

    pub fn new_virt_reg(&mut self, definition: IrIndex, ty: IrType) -> IrIndex {
        let index = self.virt_regs.push(IrVirtReg {
            definition,
            ty,
            users: IrSmallArray::EMPTY,
            flags: VregFlags::default(),
        });
        IrIndex::virt_reg(index)
    }

    pub fn new_variable(&mut self, ty: IrType) -> IrIndex {
        let index = self.variable_types.len() as u32;
        self.variable_types.push(ty);
        IrIndex::variable(index)
    }

    pub fn add_stack_slot(&mut self, ty: IrType, size: u32, align: u32) -> IrIndex {
        let index = self.stack_slots.push(IrStackSlot { ty, size, align });
        IrIndex::stack_slot(index.0)
    }

    pub fn instr_args(&self, instr: InstrIndex) -> &[IrIndex] {
        let header = &self.instructions[instr];
        let args_start = header.payload_offset as usize
            + header.flags.contains(InstrFlags::HAS_RESULT) as usize;
        &self.payload[args_start..args_start + header.num_args as usize]
    }

    pub fn instr_arg(&self, instr: InstrIndex, index: usize) -> IrIndex {
        self.instr_args(instr)[index]
    }

    pub fn set_instr_arg(&mut self, instr: InstrIndex, index: usize, value: IrIndex) {
        let header = &self.instructions[instr];
        let args_start = header.payload_offset as usize
            + header.flags.contains(InstrFlags::HAS_RESULT) as usize;
        self.payload[args_start + index] = value;
    }

    pub fn instr_result(&self, instr: InstrIndex) -> Option<IrIndex> {
        let header = &self.instructions[instr];
        header
            .flags
            .contains(InstrFlags::HAS_RESULT)
            .then(|| self.payload[header.payload_offset as usize])
    }

    pub fn set_instr_result(&mut self, instr: InstrIndex, value: IrIndex) {
        let header = &self.instructions[instr];
        debug_assert!(header.flags.contains(InstrFlags::HAS_RESULT));
        let offset = header.payload_offset as usize;
        self.payload[offset] = value;
    }

    /// Registers `user` in the user set of `value` if it is a virtual register
    pub fn add_user(&mut self, value: IrIndex, user: IrIndex) {
        if value.kind() == IrKind::VirtReg {
            let mut users = self.virt_regs[value.as_vreg()].users;
            self.arrays.push(&mut users, user);
            self.virt_regs[value.as_vreg()].users = users;
        }
    }

    pub fn remove_user(&mut self, value: IrIndex, user: IrIndex) {
        if value.kind() == IrKind::VirtReg {
            let mut users = self.virt_regs[value.as_vreg()].users;
            self.arrays.remove_one(&mut users, user);
            self.virt_regs[value.as_vreg()].users = users;
        }
    }

    /// Iterates the phis of a block through the intrusive list
    pub fn block_phis(&self, block: IrIndex) -> Vec<PhiIndex> {
        let mut result = Vec::new();
        let mut current = self.block(block).first_phi;

        while current.is_defined() {
            result.push(current.as_phi());
            current = self.phis[current.as_phi()].next_phi;
        }

        result
    }

    /// Iterates the instruction handles of a block in order
    pub fn block_instrs(&self, block: IrIndex) -> Vec<InstrIndex> {
        let mut result = Vec::new();
        let mut current = self.block(block).first_instr;

        // List termini point back at the block's own handle
        while current.is_defined() && current.kind() == IrKind::Instruction {
            result.push(current.as_instr());
            current = self.next_instr[current.payload() as usize];
        }

        result
    }

    pub fn live_vreg_count(&self) -> usize {
        self.virt_regs.len()
    }
}

#[derive(Debug)]
pub struct IrConstant {
    pub ty: IrType,
    pub value: u64,
}

#[derive(Debug)]
pub struct IrAggregate {
    pub ty: IrType,
    pub members: Vec<IrIndex>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GlobalFlags: u8 {
        const READ_ONLY      = 1 << 0;
        const ZERO_TERMINATED = 1 << 1;
        /// Resolved from a library named by `@extern(module, ...)`
        const EXTERNAL       = 1 << 2;
    }
}

#[derive(Debug)]
pub struct IrGlobal {
    pub name: Option<IdentId>,
    pub ty: IrType,
    pub data: Vec<u8>,
    pub flags: GlobalFlags,
}

/// External linkage of an IR function, derived from `@extern` attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    None,
    /// `@extern(module, "lib")`, payload is the interned library name
    Module(IdentId),
    /// `@extern(syscall, N)`
    Syscall(u32),
}

/// Compilation-wide IR entities: functions, globals and the constant pools
#[derive(Debug, Default)]
pub struct IrStore {
    pub functions: IndexVec<IrFuncIndex, IrFunction>,
    pub function_externs: Vec<ExternKind>,
    pub globals: IndexVec<IrGlobalIndex, IrGlobal>,
    pub constants: IndexVec<IrConstantIndex, IrConstant>,
    pub aggregates: IndexVec<IrAggregateIndex, IrAggregate>,
    /// Global variable declarations to their IR globals
    pub globals_by_decl: hashbrown::HashMap<AstIndex, IrIndex>,
}

impl IrStore {
    /// Integer constant, inline when it fits 24 bits
    pub fn int_constant(&mut self, value: i64, basic: BasicTypeKind) -> IrIndex {
        if let Some(small) = IrIndex::small_constant(value, basic) {
            return small;
        }

        IrIndex::constant(self.constants.push(IrConstant {
            ty: IrType::basic(basic),
            value: value as u64,
        }))
    }

    /// Reads back the integer value of a small or big constant
    pub fn constant_value(&self, handle: IrIndex) -> i64 {
        match handle.kind() {
            IrKind::ConstantSmall => handle.small_constant_value(),
            IrKind::Constant => self.constants[handle.as_constant()].value as i64,
            IrKind::ConstantZero => 0,
            kind => unreachable!("not a constant: {kind:?}"),
        }
    }

    pub fn add_global(&mut self, global: IrGlobal) -> IrIndex {
        IrIndex::global(self.globals.push(global))
    }

    pub fn add_aggregate(&mut self, ty: IrType, members: Vec<IrIndex>) -> IrIndex {
        IrIndex::aggregate(self.aggregates.push(IrAggregate { ty, members }))
    }
}

impl IrIndex {
    pub fn as_constant(self) -> IrConstantIndex {
        debug_assert_eq!(self.kind(), IrKind::Constant);
        IrConstantIndex(self.payload())
    }

    pub fn as_global(self) -> IrGlobalIndex {
        debug_assert_eq!(self.kind(), IrKind::Global);
        IrGlobalIndex(self.payload())
    }

    pub fn as_function(self) -> IrFuncIndex {
        debug_assert_eq!(self.kind(), IrKind::Function);
        IrFuncIndex(self.payload())
    }

    pub fn as_aggregate(self) -> IrAggregateIndex {
        debug_assert_eq!(self.kind(), IrKind::ConstantAggregate);
        IrAggregateIndex(self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_pack_and_unpack() {
        let block = IrIndex::block(BlockIndex(5));
        assert_eq!(block.kind(), IrKind::BasicBlock);
        assert_eq!(block.payload(), 5);

        let reg = IrIndex::phys_reg(2, 3, 77);
        assert_eq!(reg.phys_reg_class(), 2);
        assert_eq!(reg.phys_reg_size(), 3);
        assert_eq!(reg.phys_reg_index(), 77);

        assert!(!IrIndex::NONE.is_defined());
        assert_eq!(IrIndex::NONE.kind(), IrKind::None);
    }

    #[test]
    fn small_constants_extend_by_signedness() {
        let negative = IrIndex::small_constant(-3, BasicTypeKind::I32).unwrap();
        assert_eq!(negative.small_constant_value(), -3);

        let unsigned = IrIndex::small_constant(0x00AB_CDEF, BasicTypeKind::U32).unwrap();
        assert_eq!(unsigned.small_constant_value(), 0x00AB_CDEF);

        // Out of 24-bit range must go to the big-constant arena
        assert!(IrIndex::small_constant(1 << 24, BasicTypeKind::I64).is_none());
        assert!(IrIndex::small_constant(-(1 << 24), BasicTypeKind::I64).is_none());
    }

    #[test]
    fn big_constants_round_trip_through_the_store() {
        let mut store = IrStore::default();

        let big = store.int_constant(1 << 40, BasicTypeKind::I64);
        assert_eq!(big.kind(), IrKind::Constant);
        assert_eq!(store.constant_value(big), 1 << 40);

        let small = store.int_constant(60, BasicTypeKind::I64);
        assert_eq!(small.kind(), IrKind::ConstantSmall);
        assert_eq!(store.constant_value(small), 60);
    }

    #[test]
    fn type_packing_keeps_kind_and_node() {
        let ptr = IrType::node(IrTypeKind::Pointer, AstIndex(42));
        assert_eq!(ptr.kind(), IrTypeKind::Pointer);
        assert_eq!(ptr.node_index(), AstIndex(42));

        let basic = IrType::basic(BasicTypeKind::U8);
        assert_eq!(basic.kind(), IrTypeKind::Basic);
        assert_eq!(basic.basic_kind(), Some(BasicTypeKind::U8));
    }

    #[test]
    fn small_array_pool_grows_by_relocation() {
        let mut pool = IrSmallArrayPool::default();
        let mut array = IrSmallArray::EMPTY;

        for i in 0..10 {
            pool.push(&mut array, IrIndex(i + 1));
        }

        assert_eq!(array.len, 10);
        assert!(array.cap >= 10);
        let items: Vec<u32> = pool.items(array).to_vec();
        assert_eq!(items, (1..=10).collect::<Vec<u32>>());

        assert!(pool.remove_one(&mut array, IrIndex(3)));
        assert_eq!(array.len, 9);
        assert!(!pool.remove_one(&mut array, IrIndex(3)));
    }
}
