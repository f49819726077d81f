//! The static opcode table: every AML opcode with its grammar (a parse
//! program of micro-ops the main loop steps through) and its semantic
//! handler tag.
//!
//! Single-byte opcodes live at their byte value; `0x5B`-prefixed opcodes at
//! `0x5B00 | byte`. A few internal pseudo-opcodes (resolved name strings and
//! method calls) live above `0xFE00` and are never fetched from the byte
//! stream directly.

use std::collections::HashMap;
use std::sync::OnceLock;

use bitflags::bitflags;

use crate::object::ObjectType;

/// One micro-op of a parse program.
///
/// The sub-expression requests (`TermArg`, `Operand`, `SuperName`, ...)
/// preempt the current op; the main loop fetches further opcodes until one
/// of them produces the requested item, then resumes the preempted program
/// one step past the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOp {
    /// Evaluate a `SimpleName` (name string, local, or argument).
    SimpleName,
    /// Evaluate a `SuperName` (simple name, debug object, or reference op).
    SuperName,
    /// `SuperName`, then implicit-dereference the produced reference.
    SuperNameImplicitDeref,
    /// `SuperName` that tolerates an unresolved name, producing an
    /// uninitialized object instead of failing (`CondRefOf`).
    MaybeSuperName,
    /// Evaluate a `TermArg`, keeping references intact.
    TermArg,
    /// Evaluate a `TermArg`, then strip interpreter-internal references.
    TermArgUnwrapInternal,
    /// Evaluate a `TermArg` that must produce an integer.
    Operand,
    /// Evaluate a `Target` (super name or null name).
    Target,
    /// Loop head of package construction: evaluate elements until the
    /// tracked package length runs out, appending each to the package item.
    PackageElement,
    /// Decode a package length.
    PkgLen,
    /// Decode a package length and force the cursor to its end when the
    /// program finishes.
    TrackedPkgLen,
    /// Decode a name string; intermediate segments must exist, the last is
    /// allocated but not yet installed.
    CreateNamestring,
    /// Decode a name string; every segment must exist. Single bare segments
    /// search ancestor scopes upward.
    ExistingNamestring,
    /// Decode and discard a name string.
    SkipNamestring,
    /// Copy N code bytes into an immediate item.
    LoadImm(u8),
    /// Copy N code bytes into the integer payload of a fresh object item.
    LoadImmAsObject(u8),
    /// Produce an integer object item from a value embedded in the program.
    LoadInlineImm(u64),
    /// Capture the current code offset as an immediate item.
    RecordAmlPc,
    /// Step the code cursor back one byte (resolved name strings start at
    /// the already-consumed lead byte).
    AmlPcDecrement,
    /// Push a fresh uninitialized object item.
    ObjectAlloc,
    /// Push a fresh object item of the given type.
    ObjectAllocTyped(ObjectType),
    /// Apply revision-1 truncation to the last item's integer.
    TruncateNumber,
    /// Fail unless the last item's object has the given type.
    Typecheck(ObjectType),
    /// Drop the last item.
    ItemPop,
    /// Link the item at the given index (a namespace node) under its parent.
    InstallNamespaceNode(u8),
    /// Rewrite this op into a named-object or method-call pseudo-op based on
    /// what the name resolved to and what the parent expects.
    ConvertNamestring,
    /// Hand the last item's object to the preempted parent, by move.
    ObjectTransferToPrev,
    /// Hand the last item's object to the preempted parent, by deep copy.
    ObjectCopyToPrev,
    /// Store the item at `.1` into the target object at item `.0`.
    StoreToTargetIndirect(u8, u8),
    /// Dispatch to the opcode's semantic handler.
    InvokeHandler,
    /// Push a new call frame; items are the method node, the arguments, and
    /// the return slot.
    DispatchMethodCall,
    /// Recognized but unimplemented construct; abort.
    Todo,
    /// Finish this op and resume the preempted parent.
    End,
}

impl ParseOp {
    /// Whether this micro-op requests a nested expression and therefore
    /// preempts its program.
    pub fn requests_expression(self) -> bool {
        matches!(
            self,
            ParseOp::SimpleName
                | ParseOp::SuperName
                | ParseOp::SuperNameImplicitDeref
                | ParseOp::MaybeSuperName
                | ParseOp::TermArg
                | ParseOp::TermArgUnwrapInternal
                | ParseOp::Operand
                | ParseOp::Target
                | ParseOp::PackageElement
        )
    }

    /// Whether a name string evaluated under this request resolves to the
    /// named object itself rather than a method invocation.
    pub fn wants_name(self) -> bool {
        matches!(
            self,
            ParseOp::SimpleName
                | ParseOp::SuperName
                | ParseOp::SuperNameImplicitDeref
                | ParseOp::MaybeSuperName
                | ParseOp::Target
                | ParseOp::PackageElement
        )
    }
}

bitflags! {
    /// Grammar classes an opcode may appear in, checked when it starts
    /// evaluating under a preempted parent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpProperties: u8 {
        /// `TermArg := ExpressionOpcode | DataObject | ArgObj | LocalObj`
        const TERM_ARG = 1 << 0;
        /// `SuperName := SimpleName | DebugObj | ReferenceTypeOpcode`
        const SUPERNAME = 1 << 1;
        /// `SimpleName := NameString | ArgObj | LocalObj`
        const SIMPLE_NAME = 1 << 2;
        /// `Target := SuperName | NullName`
        const TARGET = 1 << 3;
    }
}

/// Semantic action tag dispatched by the `InvokeHandler` micro-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpHandler {
    /// No handler; the parse program alone is the semantics.
    None,
    Local,
    Arg,
    NamedObject,
    String,
    Buffer,
    Package,
    BinaryMath,
    UnaryMath,
    LogicalBinary,
    LogicalCompare,
    LogicalNot,
    IncDec,
    RefOrDerefOf,
    CondRefOf,
    CopyObjectOrStore,
    Index,
    Match,
    SizeOf,
    ObjectType,
    Concat,
    ConcatRes,
    Mid,
    Convert,
    CodeBlock,
    ControlFlow,
    Return,
    CreateMethod,
    CreateNamed,
    Alias,
    CreateBufferField,
    Field,
    IndexField,
    BankField,
    OpRegion,
    CreateMutex,
    CreateEvent,
    ScopedObject,
    Acquire,
    Release,
    SignalEvent,
    ResetEvent,
    WaitEvent,
    Stall,
    Sleep,
    Timer,
    Fatal,
    Breakpoint,
    Notify,
}

/// Static description of one opcode.
#[derive(Debug)]
pub struct OpSpec {
    /// Name for tracing.
    pub name: &'static str,
    /// Numeric code (`0x5B00 | byte` for extended opcodes).
    pub code: u16,
    /// Grammar classes this opcode satisfies.
    pub props: OpProperties,
    /// Semantic handler tag.
    pub handler: OpHandler,
    /// The parse program.
    pub decode: &'static [ParseOp],
}

/// Well-known opcode values referenced by handlers.
pub mod code {
    /// Build an extended (0x5B-prefixed) code.
    pub const fn ext(op: u8) -> u16 {
        0x5B00 | op as u16
    }

    pub const ZERO: u16 = 0x00;
    pub const ONE: u16 = 0x01;
    pub const ALIAS: u16 = 0x06;
    pub const NAME: u16 = 0x08;
    pub const BYTE_PREFIX: u16 = 0x0A;
    pub const WORD_PREFIX: u16 = 0x0B;
    pub const DWORD_PREFIX: u16 = 0x0C;
    pub const STRING_PREFIX: u16 = 0x0D;
    pub const QWORD_PREFIX: u16 = 0x0E;
    pub const SCOPE: u16 = 0x10;
    pub const BUFFER: u16 = 0x11;
    pub const PACKAGE: u16 = 0x12;
    pub const VAR_PACKAGE: u16 = 0x13;
    pub const METHOD: u16 = 0x14;
    pub const EXTERNAL: u16 = 0x15;
    pub const LOCAL0: u16 = 0x60;
    pub const LOCAL7: u16 = 0x67;
    pub const ARG0: u16 = 0x68;
    pub const ARG6: u16 = 0x6E;
    pub const STORE: u16 = 0x70;
    pub const REF_OF: u16 = 0x71;
    pub const ADD: u16 = 0x72;
    pub const CONCAT: u16 = 0x73;
    pub const SUBTRACT: u16 = 0x74;
    pub const INCREMENT: u16 = 0x75;
    pub const DECREMENT: u16 = 0x76;
    pub const MULTIPLY: u16 = 0x77;
    pub const DIVIDE: u16 = 0x78;
    pub const SHIFT_LEFT: u16 = 0x79;
    pub const SHIFT_RIGHT: u16 = 0x7A;
    pub const AND: u16 = 0x7B;
    pub const NAND: u16 = 0x7C;
    pub const OR: u16 = 0x7D;
    pub const NOR: u16 = 0x7E;
    pub const XOR: u16 = 0x7F;
    pub const NOT: u16 = 0x80;
    pub const FIND_SET_LEFT_BIT: u16 = 0x81;
    pub const FIND_SET_RIGHT_BIT: u16 = 0x82;
    pub const DEREF_OF: u16 = 0x83;
    pub const CONCAT_RES: u16 = 0x84;
    pub const MOD: u16 = 0x85;
    pub const NOTIFY: u16 = 0x86;
    pub const SIZE_OF: u16 = 0x87;
    pub const INDEX: u16 = 0x88;
    pub const MATCH: u16 = 0x89;
    pub const CREATE_DWORD_FIELD: u16 = 0x8A;
    pub const CREATE_WORD_FIELD: u16 = 0x8B;
    pub const CREATE_BYTE_FIELD: u16 = 0x8C;
    pub const CREATE_BIT_FIELD: u16 = 0x8D;
    pub const OBJECT_TYPE: u16 = 0x8E;
    pub const CREATE_QWORD_FIELD: u16 = 0x8F;
    pub const LAND: u16 = 0x90;
    pub const LOR: u16 = 0x91;
    pub const LNOT: u16 = 0x92;
    pub const LEQUAL: u16 = 0x93;
    pub const LGREATER: u16 = 0x94;
    pub const LLESS: u16 = 0x95;
    pub const TO_BUFFER: u16 = 0x96;
    pub const TO_DECIMAL_STRING: u16 = 0x97;
    pub const TO_HEX_STRING: u16 = 0x98;
    pub const TO_INTEGER: u16 = 0x99;
    pub const TO_STRING: u16 = 0x9C;
    pub const COPY_OBJECT: u16 = 0x9D;
    pub const MID: u16 = 0x9E;
    pub const CONTINUE: u16 = 0x9F;
    pub const IF: u16 = 0xA0;
    pub const ELSE: u16 = 0xA1;
    pub const WHILE: u16 = 0xA2;
    pub const NOOP: u16 = 0xA3;
    pub const RETURN: u16 = 0xA4;
    pub const BREAK: u16 = 0xA5;
    pub const BREAKPOINT: u16 = 0xCC;
    pub const ONES: u16 = 0xFF;

    pub const MUTEX: u16 = ext(0x01);
    pub const EVENT: u16 = ext(0x02);
    pub const COND_REF_OF: u16 = ext(0x12);
    pub const CREATE_FIELD: u16 = ext(0x13);
    pub const LOAD_TABLE: u16 = ext(0x1F);
    pub const LOAD: u16 = ext(0x20);
    pub const STALL: u16 = ext(0x21);
    pub const SLEEP: u16 = ext(0x22);
    pub const ACQUIRE: u16 = ext(0x23);
    pub const SIGNAL: u16 = ext(0x24);
    pub const WAIT: u16 = ext(0x25);
    pub const RESET: u16 = ext(0x26);
    pub const RELEASE: u16 = ext(0x27);
    pub const FROM_BCD: u16 = ext(0x28);
    pub const TO_BCD: u16 = ext(0x29);
    pub const REVISION: u16 = ext(0x30);
    pub const DEBUG: u16 = ext(0x31);
    pub const FATAL: u16 = ext(0x32);
    pub const TIMER: u16 = ext(0x33);
    pub const OP_REGION: u16 = ext(0x80);
    pub const FIELD: u16 = ext(0x81);
    pub const DEVICE: u16 = ext(0x82);
    pub const PROCESSOR: u16 = ext(0x83);
    pub const POWER_RES: u16 = ext(0x84);
    pub const THERMAL_ZONE: u16 = ext(0x85);
    pub const INDEX_FIELD: u16 = ext(0x86);
    pub const BANK_FIELD: u16 = ext(0x87);
    pub const DATA_REGION: u16 = ext(0x88);

    /// Internal: a name string that resolved to a non-method object.
    pub const INTERNAL_NAMED_OBJECT: u16 = 0xFF01;
    /// Internal: a name string about to be resolved.
    pub const INTERNAL_UNRESOLVED_NAME: u16 = 0xFF00;
    /// Internal: a resolved method call taking N arguments
    /// (`INTERNAL_METHOD_CALL0 + N`).
    pub const INTERNAL_METHOD_CALL0: u16 = 0xFE00;
}

use ParseOp::*;

const NONE: OpProperties = OpProperties::empty();
const TERM: OpProperties = OpProperties::TERM_ARG;
/// Locals, args and named objects: usable in every grammar class.
const ARG_LIKE: OpProperties = OpProperties::all();
/// `RefOf`/`DerefOf`/`Index`: term args and reference-type super names.
const REF_LIKE: OpProperties = OpProperties::TERM_ARG
    .union(OpProperties::SUPERNAME)
    .union(OpProperties::TARGET);
const DEBUG_LIKE: OpProperties = OpProperties::SUPERNAME.union(OpProperties::TARGET);
/// `Zero` doubles as the encoding of a null target.
const ZERO_LIKE: OpProperties = OpProperties::TERM_ARG.union(OpProperties::TARGET);

macro_rules! op {
    ($name:literal, $code:expr, $props:expr, $handler:ident, [$($step:expr),* $(,)?]) => {
        OpSpec {
            name: $name,
            code: $code,
            props: $props,
            handler: OpHandler::$handler,
            decode: &[$($step),*],
        }
    };
    ($name:literal, $code:expr, $props:expr, $handler:ident, $decode:expr) => {
        OpSpec {
            name: $name,
            code: $code,
            props: $props,
            handler: OpHandler::$handler,
            decode: $decode,
        }
    };
}

const BINARY_MATH: &[ParseOp] = &[
    Operand,
    Operand,
    Target,
    ObjectAllocTyped(ObjectType::Integer),
    InvokeHandler,
    StoreToTargetIndirect(2, 3),
    ObjectTransferToPrev,
    End,
];

const UNARY_MATH: &[ParseOp] = &[
    Operand,
    Target,
    ObjectAllocTyped(ObjectType::Integer),
    InvokeHandler,
    StoreToTargetIndirect(1, 2),
    ObjectTransferToPrev,
    End,
];

const CONCAT_LIKE: &[ParseOp] = &[
    TermArgUnwrapInternal,
    TermArgUnwrapInternal,
    Target,
    ObjectAlloc,
    InvokeHandler,
    StoreToTargetIndirect(2, 3),
    ObjectTransferToPrev,
    End,
];

const CONVERT_1ARG: &[ParseOp] = &[
    TermArgUnwrapInternal,
    Target,
    ObjectAlloc,
    InvokeHandler,
    StoreToTargetIndirect(1, 2),
    ObjectTransferToPrev,
    End,
];

const LOCAL_OR_ARG: &[ParseOp] = &[ObjectAlloc, InvokeHandler, ObjectTransferToPrev, End];

const CREATE_SIZED_BUFFER_FIELD: &[ParseOp] = &[
    TermArg,
    Operand,
    CreateNamestring,
    InvokeHandler,
    InstallNamespaceNode(2),
    End,
];

/// The opcode table. Order is free; lookups go through [`lookup`].
static TABLE: &[OpSpec] = &[
    op!("ZeroOp", code::ZERO, ZERO_LIKE, None, [LoadInlineImm(0), ObjectTransferToPrev, End]),
    op!("OneOp", code::ONE, TERM, None, [LoadInlineImm(1), ObjectTransferToPrev, End]),
    op!("AliasOp", code::ALIAS, NONE, Alias,
        [ExistingNamestring, CreateNamestring, InvokeHandler, InstallNamespaceNode(1), End]),
    op!("NameOp", code::NAME, NONE, CreateNamed,
        [CreateNamestring, TermArgUnwrapInternal, InvokeHandler, InstallNamespaceNode(0), End]),
    op!("BytePrefix", code::BYTE_PREFIX, TERM, None,
        [LoadImmAsObject(1), ObjectTransferToPrev, End]),
    op!("WordPrefix", code::WORD_PREFIX, TERM, None,
        [LoadImmAsObject(2), ObjectTransferToPrev, End]),
    op!("DWordPrefix", code::DWORD_PREFIX, TERM, None,
        [LoadImmAsObject(4), ObjectTransferToPrev, End]),
    op!("StringPrefix", code::STRING_PREFIX, TERM, String,
        [ObjectAllocTyped(ObjectType::String), InvokeHandler, ObjectTransferToPrev, End]),
    op!("QWordPrefix", code::QWORD_PREFIX, TERM, None,
        [LoadImmAsObject(8), TruncateNumber, ObjectTransferToPrev, End]),
    op!("ScopeOp", code::SCOPE, NONE, CodeBlock,
        [PkgLen, ExistingNamestring, InvokeHandler, End]),
    op!("BufferOp", code::BUFFER, TERM, Buffer,
        [TrackedPkgLen, Operand, ObjectAllocTyped(ObjectType::Buffer), InvokeHandler,
         ObjectTransferToPrev, End]),
    op!("PackageOp", code::PACKAGE, TERM, Package,
        [TrackedPkgLen, LoadImm(1), ObjectAllocTyped(ObjectType::Package), PackageElement,
         InvokeHandler, ObjectTransferToPrev, End]),
    op!("VarPackageOp", code::VAR_PACKAGE, TERM, Package,
        [TrackedPkgLen, Operand, ObjectAllocTyped(ObjectType::Package), PackageElement,
         InvokeHandler, ObjectTransferToPrev, End]),
    op!("MethodOp", code::METHOD, NONE, CreateMethod,
        [TrackedPkgLen, CreateNamestring, LoadImm(1), RecordAmlPc, InvokeHandler,
         InstallNamespaceNode(1), End]),
    op!("ExternalOp", code::EXTERNAL, NONE, None,
        [SkipNamestring, LoadImm(1), LoadImm(1), End]),
    op!("Local0Op", 0x60, ARG_LIKE, Local, LOCAL_OR_ARG),
    op!("Local1Op", 0x61, ARG_LIKE, Local, LOCAL_OR_ARG),
    op!("Local2Op", 0x62, ARG_LIKE, Local, LOCAL_OR_ARG),
    op!("Local3Op", 0x63, ARG_LIKE, Local, LOCAL_OR_ARG),
    op!("Local4Op", 0x64, ARG_LIKE, Local, LOCAL_OR_ARG),
    op!("Local5Op", 0x65, ARG_LIKE, Local, LOCAL_OR_ARG),
    op!("Local6Op", 0x66, ARG_LIKE, Local, LOCAL_OR_ARG),
    op!("Local7Op", 0x67, ARG_LIKE, Local, LOCAL_OR_ARG),
    op!("Arg0Op", 0x68, ARG_LIKE, Arg, LOCAL_OR_ARG),
    op!("Arg1Op", 0x69, ARG_LIKE, Arg, LOCAL_OR_ARG),
    op!("Arg2Op", 0x6A, ARG_LIKE, Arg, LOCAL_OR_ARG),
    op!("Arg3Op", 0x6B, ARG_LIKE, Arg, LOCAL_OR_ARG),
    op!("Arg4Op", 0x6C, ARG_LIKE, Arg, LOCAL_OR_ARG),
    op!("Arg5Op", 0x6D, ARG_LIKE, Arg, LOCAL_OR_ARG),
    op!("Arg6Op", 0x6E, ARG_LIKE, Arg, LOCAL_OR_ARG),
    op!("StoreOp", code::STORE, TERM, CopyObjectOrStore,
        [TermArg, SuperName, InvokeHandler, ItemPop, ObjectTransferToPrev, End]),
    op!("RefOfOp", code::REF_OF, REF_LIKE, RefOrDerefOf,
        [SuperName, ObjectAlloc, InvokeHandler, ObjectTransferToPrev, End]),
    op!("AddOp", code::ADD, TERM, BinaryMath, BINARY_MATH),
    op!("ConcatOp", code::CONCAT, TERM, Concat, CONCAT_LIKE),
    op!("SubtractOp", code::SUBTRACT, TERM, BinaryMath, BINARY_MATH),
    op!("IncrementOp", code::INCREMENT, TERM, IncDec,
        [SuperNameImplicitDeref, InvokeHandler, ObjectCopyToPrev, End]),
    op!("DecrementOp", code::DECREMENT, TERM, IncDec,
        [SuperNameImplicitDeref, InvokeHandler, ObjectCopyToPrev, End]),
    op!("MultiplyOp", code::MULTIPLY, TERM, BinaryMath, BINARY_MATH),
    op!("DivideOp", code::DIVIDE, TERM, BinaryMath,
        [Operand, Operand, Target, Target,
         ObjectAllocTyped(ObjectType::Integer), ObjectAllocTyped(ObjectType::Integer),
         InvokeHandler, StoreToTargetIndirect(2, 4), StoreToTargetIndirect(3, 5),
         ObjectTransferToPrev, End]),
    op!("ShiftLeftOp", code::SHIFT_LEFT, TERM, BinaryMath, BINARY_MATH),
    op!("ShiftRightOp", code::SHIFT_RIGHT, TERM, BinaryMath, BINARY_MATH),
    op!("AndOp", code::AND, TERM, BinaryMath, BINARY_MATH),
    op!("NandOp", code::NAND, TERM, BinaryMath, BINARY_MATH),
    op!("OrOp", code::OR, TERM, BinaryMath, BINARY_MATH),
    op!("NorOp", code::NOR, TERM, BinaryMath, BINARY_MATH),
    op!("XorOp", code::XOR, TERM, BinaryMath, BINARY_MATH),
    op!("NotOp", code::NOT, TERM, UnaryMath, UNARY_MATH),
    op!("FindSetLeftBitOp", code::FIND_SET_LEFT_BIT, TERM, UnaryMath, UNARY_MATH),
    op!("FindSetRightBitOp", code::FIND_SET_RIGHT_BIT, TERM, UnaryMath, UNARY_MATH),
    op!("DerefOfOp", code::DEREF_OF, REF_LIKE, RefOrDerefOf,
        [TermArg, ObjectAlloc, InvokeHandler, ObjectTransferToPrev, End]),
    op!("ConcatResOp", code::CONCAT_RES, TERM, ConcatRes, CONCAT_LIKE),
    op!("ModOp", code::MOD, TERM, BinaryMath, BINARY_MATH),
    op!("NotifyOp", code::NOTIFY, NONE, Notify, [SuperName, Operand, InvokeHandler, End]),
    op!("SizeOfOp", code::SIZE_OF, TERM, SizeOf,
        [SuperNameImplicitDeref, ObjectAllocTyped(ObjectType::Integer), InvokeHandler,
         ObjectTransferToPrev, End]),
    op!("IndexOp", code::INDEX, REF_LIKE, Index,
        [TermArgUnwrapInternal, Operand, Target, ObjectAlloc, InvokeHandler,
         StoreToTargetIndirect(2, 3), ObjectTransferToPrev, End]),
    op!("MatchOp", code::MATCH, TERM, Match,
        [TermArgUnwrapInternal, LoadImm(1), TermArgUnwrapInternal, LoadImm(1),
         TermArgUnwrapInternal, Operand, ObjectAllocTyped(ObjectType::Integer),
         InvokeHandler, ObjectTransferToPrev, End]),
    op!("CreateDWordFieldOp", code::CREATE_DWORD_FIELD, NONE, CreateBufferField,
        CREATE_SIZED_BUFFER_FIELD),
    op!("CreateWordFieldOp", code::CREATE_WORD_FIELD, NONE, CreateBufferField,
        CREATE_SIZED_BUFFER_FIELD),
    op!("CreateByteFieldOp", code::CREATE_BYTE_FIELD, NONE, CreateBufferField,
        CREATE_SIZED_BUFFER_FIELD),
    op!("CreateBitFieldOp", code::CREATE_BIT_FIELD, NONE, CreateBufferField,
        CREATE_SIZED_BUFFER_FIELD),
    op!("ObjectTypeOp", code::OBJECT_TYPE, TERM, ObjectType,
        [SuperName, ObjectAllocTyped(ObjectType::Integer), InvokeHandler,
         ObjectTransferToPrev, End]),
    op!("CreateQWordFieldOp", code::CREATE_QWORD_FIELD, NONE, CreateBufferField,
        CREATE_SIZED_BUFFER_FIELD),
    op!("LandOp", code::LAND, TERM, LogicalBinary,
        [Operand, Operand, ObjectAllocTyped(ObjectType::Integer), InvokeHandler,
         ObjectTransferToPrev, End]),
    op!("LorOp", code::LOR, TERM, LogicalBinary,
        [Operand, Operand, ObjectAllocTyped(ObjectType::Integer), InvokeHandler,
         ObjectTransferToPrev, End]),
    op!("LnotOp", code::LNOT, TERM, LogicalNot,
        [Operand, ObjectAllocTyped(ObjectType::Integer), InvokeHandler,
         ObjectTransferToPrev, End]),
    op!("LEqualOp", code::LEQUAL, TERM, LogicalCompare, LOGICAL_COMPARE),
    op!("LGreaterOp", code::LGREATER, TERM, LogicalCompare, LOGICAL_COMPARE),
    op!("LLessOp", code::LLESS, TERM, LogicalCompare, LOGICAL_COMPARE),
    op!("ToBufferOp", code::TO_BUFFER, TERM, Convert, CONVERT_1ARG),
    op!("ToDecimalStringOp", code::TO_DECIMAL_STRING, TERM, Convert, CONVERT_1ARG),
    op!("ToHexStringOp", code::TO_HEX_STRING, TERM, Convert, CONVERT_1ARG),
    op!("ToIntegerOp", code::TO_INTEGER, TERM, Convert, CONVERT_1ARG),
    op!("ToStringOp", code::TO_STRING, TERM, Convert,
        [TermArgUnwrapInternal, Operand, Target, ObjectAlloc, InvokeHandler,
         StoreToTargetIndirect(2, 3), ObjectTransferToPrev, End]),
    op!("CopyObjectOp", code::COPY_OBJECT, TERM, CopyObjectOrStore,
        [TermArg, SimpleName, InvokeHandler, ItemPop, ObjectTransferToPrev, End]),
    op!("MidOp", code::MID, TERM, Mid,
        [TermArgUnwrapInternal, Operand, Operand, Target, ObjectAlloc, InvokeHandler,
         StoreToTargetIndirect(3, 4), ObjectTransferToPrev, End]),
    op!("ContinueOp", code::CONTINUE, NONE, ControlFlow, [InvokeHandler, End]),
    op!("IfOp", code::IF, NONE, CodeBlock, [PkgLen, Operand, InvokeHandler, End]),
    op!("ElseOp", code::ELSE, NONE, CodeBlock, [PkgLen, InvokeHandler, End]),
    op!("WhileOp", code::WHILE, NONE, CodeBlock, [PkgLen, Operand, InvokeHandler, End]),
    op!("NoopOp", code::NOOP, NONE, None, [End]),
    op!("ReturnOp", code::RETURN, NONE, Return, [TermArg, InvokeHandler, End]),
    op!("BreakOp", code::BREAK, NONE, ControlFlow, [InvokeHandler, End]),
    op!("BreakPointOp", code::BREAKPOINT, NONE, Breakpoint, [InvokeHandler, End]),
    op!("OnesOp", code::ONES, TERM, None,
        [LoadInlineImm(u64::MAX), TruncateNumber, ObjectTransferToPrev, End]),
    // Extended opcodes.
    op!("MutexOp", code::MUTEX, NONE, CreateMutex,
        [CreateNamestring, LoadImm(1), InvokeHandler, InstallNamespaceNode(0), End]),
    op!("EventOp", code::EVENT, NONE, CreateEvent,
        [CreateNamestring, InvokeHandler, InstallNamespaceNode(0), End]),
    op!("CondRefOfOp", code::COND_REF_OF, TERM, CondRefOf,
        [MaybeSuperName, Target, ObjectAllocTyped(ObjectType::Integer), InvokeHandler,
         ObjectTransferToPrev, End]),
    op!("CreateFieldOp", code::CREATE_FIELD, NONE, CreateBufferField,
        [TermArg, Operand, Operand, CreateNamestring, InvokeHandler,
         InstallNamespaceNode(3), End]),
    op!("LoadTableOp", code::LOAD_TABLE, TERM, None, [Todo, End]),
    op!("LoadOp", code::LOAD, NONE, None, [Todo, End]),
    op!("StallOp", code::STALL, NONE, Stall, [Operand, InvokeHandler, End]),
    op!("SleepOp", code::SLEEP, NONE, Sleep, [Operand, InvokeHandler, End]),
    op!("AcquireOp", code::ACQUIRE, TERM, Acquire,
        [SuperNameImplicitDeref, Typecheck(ObjectType::Mutex), LoadImm(2),
         ObjectAllocTyped(ObjectType::Integer), InvokeHandler, ObjectTransferToPrev, End]),
    op!("SignalOp", code::SIGNAL, NONE, SignalEvent,
        [SuperNameImplicitDeref, Typecheck(ObjectType::Event), InvokeHandler, End]),
    op!("WaitOp", code::WAIT, TERM, WaitEvent,
        [SuperNameImplicitDeref, Typecheck(ObjectType::Event), Operand,
         ObjectAllocTyped(ObjectType::Integer), InvokeHandler, ObjectTransferToPrev, End]),
    op!("ResetOp", code::RESET, NONE, ResetEvent,
        [SuperNameImplicitDeref, Typecheck(ObjectType::Event), InvokeHandler, End]),
    op!("ReleaseOp", code::RELEASE, NONE, Release,
        [SuperNameImplicitDeref, Typecheck(ObjectType::Mutex), InvokeHandler, End]),
    op!("FromBCDOp", code::FROM_BCD, TERM, UnaryMath, UNARY_MATH),
    op!("ToBCDOp", code::TO_BCD, TERM, UnaryMath, UNARY_MATH),
    op!("RevisionOp", code::REVISION, TERM, None,
        [LoadInlineImm(crate::consts::INTERPRETER_REVISION), ObjectTransferToPrev, End]),
    op!("DebugOp", code::DEBUG, DEBUG_LIKE, None,
        [ObjectAllocTyped(ObjectType::Debug), ObjectTransferToPrev, End]),
    op!("FatalOp", code::FATAL, NONE, Fatal,
        [LoadImm(1), LoadImm(4), Operand, InvokeHandler, End]),
    op!("TimerOp", code::TIMER, TERM, Timer,
        [ObjectAllocTyped(ObjectType::Integer), InvokeHandler, ObjectTransferToPrev, End]),
    op!("OpRegionOp", code::OP_REGION, NONE, OpRegion,
        [CreateNamestring, LoadImm(1), Operand, Operand, InvokeHandler,
         InstallNamespaceNode(0), End]),
    op!("FieldOp", code::FIELD, NONE, Field,
        [TrackedPkgLen, ExistingNamestring, LoadImm(1), InvokeHandler, End]),
    op!("DeviceOp", code::DEVICE, NONE, ScopedObject,
        [PkgLen, CreateNamestring, InvokeHandler, InstallNamespaceNode(1), End]),
    op!("ProcessorOp", code::PROCESSOR, NONE, ScopedObject,
        [PkgLen, CreateNamestring, LoadImm(1), LoadImm(4), LoadImm(1), InvokeHandler,
         InstallNamespaceNode(1), End]),
    op!("PowerResOp", code::POWER_RES, NONE, ScopedObject,
        [PkgLen, CreateNamestring, LoadImm(1), LoadImm(2), InvokeHandler,
         InstallNamespaceNode(1), End]),
    op!("ThermalZoneOp", code::THERMAL_ZONE, NONE, ScopedObject,
        [PkgLen, CreateNamestring, InvokeHandler, InstallNamespaceNode(1), End]),
    op!("IndexFieldOp", code::INDEX_FIELD, NONE, IndexField,
        [TrackedPkgLen, ExistingNamestring, ExistingNamestring, LoadImm(1),
         InvokeHandler, End]),
    op!("BankFieldOp", code::BANK_FIELD, NONE, BankField,
        [TrackedPkgLen, ExistingNamestring, ExistingNamestring, Operand, LoadImm(1),
         InvokeHandler, End]),
    op!("DataRegionOp", code::DATA_REGION, NONE, None, [Todo, End]),
    // Internal pseudo-opcodes.
    op!("UnresolvedNameString", code::INTERNAL_UNRESOLVED_NAME, ARG_LIKE, None,
        [AmlPcDecrement, ExistingNamestring, ConvertNamestring]),
    op!("NamedObject", code::INTERNAL_NAMED_OBJECT, ARG_LIKE, NamedObject,
        [ObjectAlloc, InvokeHandler, ObjectTransferToPrev, End]),
    op!("MethodCall0Args", code::INTERNAL_METHOD_CALL0, TERM, None,
        [ObjectAlloc, DispatchMethodCall, ObjectTransferToPrev, End]),
    op!("MethodCall1Args", code::INTERNAL_METHOD_CALL0 + 1, TERM, None,
        [TermArg, ObjectAlloc, DispatchMethodCall, ObjectTransferToPrev, End]),
    op!("MethodCall2Args", code::INTERNAL_METHOD_CALL0 + 2, TERM, None,
        [TermArg, TermArg, ObjectAlloc, DispatchMethodCall, ObjectTransferToPrev, End]),
    op!("MethodCall3Args", code::INTERNAL_METHOD_CALL0 + 3, TERM, None,
        [TermArg, TermArg, TermArg, ObjectAlloc, DispatchMethodCall,
         ObjectTransferToPrev, End]),
    op!("MethodCall4Args", code::INTERNAL_METHOD_CALL0 + 4, TERM, None,
        [TermArg, TermArg, TermArg, TermArg, ObjectAlloc, DispatchMethodCall,
         ObjectTransferToPrev, End]),
    op!("MethodCall5Args", code::INTERNAL_METHOD_CALL0 + 5, TERM, None,
        [TermArg, TermArg, TermArg, TermArg, TermArg, ObjectAlloc, DispatchMethodCall,
         ObjectTransferToPrev, End]),
    op!("MethodCall6Args", code::INTERNAL_METHOD_CALL0 + 6, TERM, None,
        [TermArg, TermArg, TermArg, TermArg, TermArg, TermArg, ObjectAlloc,
         DispatchMethodCall, ObjectTransferToPrev, End]),
    op!("MethodCall7Args", code::INTERNAL_METHOD_CALL0 + 7, TERM, None,
        [TermArg, TermArg, TermArg, TermArg, TermArg, TermArg, TermArg, ObjectAlloc,
         DispatchMethodCall, ObjectTransferToPrev, End]),
];

const LOGICAL_COMPARE: &[ParseOp] = &[
    TermArgUnwrapInternal,
    TermArgUnwrapInternal,
    ObjectAllocTyped(ObjectType::Integer),
    InvokeHandler,
    ObjectTransferToPrev,
    End,
];

fn index() -> &'static HashMap<u16, &'static OpSpec> {
    static INDEX: OnceLock<HashMap<u16, &'static OpSpec>> = OnceLock::new();
    INDEX.get_or_init(|| TABLE.iter().map(|spec| (spec.code, spec)).collect())
}

/// Look up an opcode by numeric value.
pub fn lookup(op: u16) -> Option<&'static OpSpec> {
    index().get(&op).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_duplicate_codes() {
        assert_eq!(index().len(), TABLE.len());
    }

    #[test]
    fn every_program_terminates() {
        for spec in TABLE {
            let last = *spec.decode.last().unwrap();
            assert!(
                last == End || last == ConvertNamestring,
                "{} must end in End or a rewrite",
                spec.name
            );
        }
    }

    #[test]
    fn method_call_arity_matches_program() {
        for n in 0..=7u16 {
            let spec = lookup(code::INTERNAL_METHOD_CALL0 + n).unwrap();
            let args = spec
                .decode
                .iter()
                .filter(|p| **p == ParseOp::TermArg)
                .count();
            assert_eq!(args as u16, n);
        }
    }

    #[test]
    fn extended_codes_round_trip() {
        assert_eq!(code::ext(0x31), 0x5B31);
        assert_eq!(lookup(code::DEBUG).unwrap().name, "DebugOp");
        assert!(lookup(0x5BFF).is_none());
    }
}
