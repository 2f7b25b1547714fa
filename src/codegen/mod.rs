//! AST lowering onto the Cranelift backend.
//!
//! The lowering engine drives a `FunctionBuilder` with a single insertion
//! point: variables live in stack slots, struct and array addressing is
//! byte-offset arithmetic against the layout table, and control flow is
//! explicit blocks with tracked termination. Functions are declared first
//! (bodyless ones as imports) and then defined in source order; each defined
//! function is run through the Cranelift verifier and its textual IR is
//! captured for `-o`-less output.

pub mod layout;

mod expr;
mod stmt;

use std::collections::HashMap;

use cranelift::codegen::ir::{FuncRef, StackSlot, UserFuncName};
use cranelift::codegen::verifier::verify_function;
use cranelift::prelude::{
    settings, types, AbiParam, Configurable, FunctionBuilder, FunctionBuilderContext, InstBuilder,
    MemFlags, Signature, StackSlotData, StackSlotKind, Value,
};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};

use crate::errors::Diagnostic;
use crate::parser::ast::{FunctionDecl, Primitive, Type};
use crate::parser::ParseOutput;
use layout::ClassLayouts;

/// Build an object module targeting the host: position-independent code,
/// generic CPU, no extra feature strings.
pub fn native_object_module(name: &str) -> Result<ObjectModule, Diagnostic> {
    let mut flags = settings::builder();
    flags
        .set("is_pic", "true")
        .map_err(|err| Diagnostic::internal(format!("Failed to set backend flag: {}", err)))?;

    let isa_builder = cranelift_native::builder().map_err(|msg| {
        Diagnostic::internal(format!("Host machine is not supported by the backend: {}", msg))
    })?;
    let isa = isa_builder
        .finish(settings::Flags::new(flags))
        .map_err(|err| Diagnostic::internal(format!("Failed to build target ISA: {}", err)))?;

    let builder = ObjectBuilder::new(isa, name.to_string(), cranelift_module::default_libcall_names())
        .map_err(|err| Diagnostic::internal(format!("Failed to create object module: {}", err)))?;
    Ok(ObjectModule::new(builder))
}

/// Scalar backend type for a front-end type. `None` for void and for
/// aggregates, which only ever live in memory.
pub(crate) fn scalar_type(ptr_type: types::Type, ty: &Type) -> Option<types::Type> {
    match ty {
        Type::Primitive { kind, .. } => match kind {
            Primitive::Void => None,
            Primitive::Bool | Primitive::Char => Some(types::I8),
            Primitive::Short => Some(types::I16),
            Primitive::Int => Some(types::I32),
            Primitive::Long => Some(types::I64),
            Primitive::Half => Some(types::F16),
            Primitive::Float => Some(types::F32),
            Primitive::Double => Some(types::F64),
            Primitive::Quad => Some(types::F128),
        },
        Type::Pointer(_) => Some(ptr_type),
        Type::Array { .. } | Type::Class(_) => None,
    }
}

pub(crate) fn is_void(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Primitive {
            kind: Primitive::Void,
            ..
        }
    )
}

#[derive(Clone)]
pub(crate) struct DeclaredFunction {
    pub id: FuncId,
    pub signature: Signature,
    pub return_type: Type,
}

/// Interned nul-terminated string constants.
struct StringPool {
    next_id: usize,
    ids: HashMap<String, DataId>,
}

impl StringPool {
    fn new() -> Self {
        Self {
            next_id: 0,
            ids: HashMap::new(),
        }
    }

    fn data_id_for<M: Module>(
        &mut self,
        module: &mut M,
        text: &str,
    ) -> Result<DataId, Diagnostic> {
        if let Some(id) = self.ids.get(text) {
            return Ok(*id);
        }

        let name = format!("ax.str.{}", self.next_id);
        self.next_id += 1;

        let mut data = DataDescription::new();
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        data.define(bytes.into_boxed_slice());

        let data_id = module
            .declare_data(&name, Linkage::Local, false, false)
            .map_err(|err| Diagnostic::codegen(format!("Failed to declare string data: {}", err)))?;
        module
            .define_data(data_id, &data)
            .map_err(|err| Diagnostic::codegen(format!("Failed to define string data: {}", err)))?;
        self.ids.insert(text.to_string(), data_id);
        Ok(data_id)
    }
}

/// Lowers a parsed compilation into a backend module.
pub struct Codegen<M: Module> {
    module: M,
    layouts: ClassLayouts,
    functions: HashMap<String, DeclaredFunction>,
    strings: StringPool,
    clif: Vec<String>,
}

impl<M: Module> Codegen<M> {
    pub fn new(module: M) -> Self {
        let ptr_bytes = u32::from(module.target_config().pointer_bytes());
        Self {
            module,
            layouts: ClassLayouts::new(ptr_bytes),
            functions: HashMap::new(),
            strings: StringPool::new(),
            clif: Vec::new(),
        }
    }

    /// Lower the whole compilation: class layouts first (encounter order),
    /// then declarations for every function, then the bodies.
    pub fn compile(&mut self, output: &ParseOutput) -> Result<(), Diagnostic> {
        let ptr_bytes = u32::from(self.module.target_config().pointer_bytes());
        self.layouts = ClassLayouts::compute(&output.classes, ptr_bytes)?;

        for function in &output.functions {
            self.declare_function(function)?;
        }

        for function in &output.functions {
            if function.body.is_some() {
                self.define_function(function)?;
            }
        }

        Ok(())
    }

    /// Textual IR of every defined function, in definition order.
    pub fn clif_text(&self) -> String {
        self.clif.join("\n")
    }

    pub fn finish(self) -> M {
        self.module
    }

    fn declare_function(&mut self, decl: &FunctionDecl) -> Result<(), Diagnostic> {
        let ptr_type = self.module.target_config().pointer_type();

        let mut signature = self.module.make_signature();
        for (name, ty) in &decl.params {
            let Some(clif) = scalar_type(ptr_type, ty) else {
                return Err(Diagnostic::codegen(format!(
                    "Parameter '{}' of function '{}' cannot be passed by value",
                    name, decl.name
                )));
            };
            signature.params.push(AbiParam::new(clif));
        }
        if !is_void(&decl.return_type) {
            let Some(clif) = scalar_type(ptr_type, &decl.return_type) else {
                return Err(Diagnostic::codegen(format!(
                    "Function '{}' cannot return its return type by value",
                    decl.name
                )));
            };
            signature.returns.push(AbiParam::new(clif));
        }

        // source functions are always public; a bodyless function is an
        // external declaration
        let linkage = if decl.body.is_some() {
            Linkage::Export
        } else {
            Linkage::Import
        };

        let id = self
            .module
            .declare_function(&decl.name, linkage, &signature)
            .map_err(|err| {
                Diagnostic::codegen(format!("Failed to declare function '{}': {}", decl.name, err))
            })?;

        self.functions.insert(
            decl.name.clone(),
            DeclaredFunction {
                id,
                signature,
                return_type: decl.return_type.clone(),
            },
        );
        Ok(())
    }

    fn define_function(&mut self, decl: &FunctionDecl) -> Result<(), Diagnostic> {
        let info = self
            .functions
            .get(&decl.name)
            .cloned()
            .ok_or_else(|| Diagnostic::internal(format!("Function '{}' was not declared", decl.name)))?;

        let ptr_type = self.module.target_config().pointer_type();
        let mut context = self.module.make_context();
        context.func.signature = info.signature.clone();
        context.func.name = UserFuncName::testcase(&decl.name);

        {
            let mut builder_context = FunctionBuilderContext::new();
            let Self {
                module,
                layouts,
                functions,
                strings,
                ..
            } = self;
            let builder = FunctionBuilder::new(&mut context.func, &mut builder_context);

            let mut lowering = FunctionLowering {
                module,
                layouts,
                functions,
                strings,
                builder,
                func_refs: HashMap::new(),
                scopes: Vec::new(),
                terminated: false,
                return_type: decl.return_type.clone(),
                func_name: decl.name.clone(),
                ptr_type,
            };
            lowering.lower(decl)?;
            lowering.finish();
        }

        verify_function(&context.func, self.module.isa()).map_err(|errors| {
            Diagnostic::codegen(format!(
                "Function '{}' failed verification:\n{}",
                decl.name, errors
            ))
        })?;

        self.clif.push(format!("{}", context.func.display()));

        self.module.define_function(info.id, &mut context).map_err(|err| {
            Diagnostic::codegen(format!("Failed to define function '{}': {}", decl.name, err))
        })?;
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct VarSlot {
    pub slot: StackSlot,
    pub ty: Type,
}

/// Per-function lowering state: the SSA builder, the slot scopes, and the
/// shared module-level tables.
pub(crate) struct FunctionLowering<'a, 'b, M: Module> {
    module: &'a mut M,
    pub(crate) layouts: &'a ClassLayouts,
    functions: &'a HashMap<String, DeclaredFunction>,
    strings: &'a mut StringPool,
    pub(crate) builder: FunctionBuilder<'b>,
    func_refs: HashMap<String, FuncRef>,
    scopes: Vec<HashMap<String, VarSlot>>,
    pub(crate) terminated: bool,
    pub(crate) return_type: Type,
    pub(crate) func_name: String,
    pub(crate) ptr_type: types::Type,
}

impl<'a, 'b, M: Module> FunctionLowering<'a, 'b, M> {
    fn lower(&mut self, decl: &FunctionDecl) -> Result<(), Diagnostic> {
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);

        self.push_scope();

        // parameters are copied into stack slots so they are addressable and
        // mutable like any other variable
        let incoming: Vec<Value> = self.builder.block_params(entry).to_vec();
        for ((name, ty), value) in decl.params.iter().zip(incoming) {
            let slot = self.create_slot(ty)?;
            let addr = self.slot_addr(slot);
            self.builder.ins().store(MemFlags::new(), value, addr, 0);
            self.declare_variable(name.clone(), slot, ty.clone());
        }

        let body = decl
            .body
            .as_ref()
            .ok_or_else(|| Diagnostic::internal("Cannot lower a bodyless function"))?;
        for stmt in body {
            if self.terminated {
                break;
            }
            self.lower_stmt(stmt)?;
        }

        if !self.terminated {
            if is_void(&self.return_type) {
                self.builder.ins().return_(&[]);
            } else {
                return Err(Diagnostic::codegen(format!(
                    "Function '{}' can reach the end of its body without returning a value",
                    self.func_name
                )));
            }
        }

        self.pop_scope();
        Ok(())
    }

    fn finish(mut self) {
        self.builder.seal_all_blocks();
        self.builder.finalize();
    }

    pub(crate) fn create_slot(&mut self, ty: &Type) -> Result<StackSlot, Diagnostic> {
        let size = self.layouts.size_of(ty)?;
        let align_shift = self.layouts.align_of(ty)?.trailing_zeros() as u8;
        let data = StackSlotData::new(StackSlotKind::ExplicitSlot, size, align_shift);
        Ok(self.builder.create_sized_stack_slot(data))
    }

    pub(crate) fn slot_addr(&mut self, slot: StackSlot) -> Value {
        self.builder.ins().stack_addr(self.ptr_type, slot, 0)
    }

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn declare_variable(&mut self, name: String, slot: StackSlot, ty: Type) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, VarSlot { slot, ty });
        }
    }

    pub(crate) fn lookup_variable(&self, name: &str) -> Option<VarSlot> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.get(name) {
                return Some(slot.clone());
            }
        }
        None
    }

    pub(crate) fn clif_type(&self, ty: &Type) -> Option<types::Type> {
        scalar_type(self.ptr_type, ty)
    }

    /// Interned pointer to the start of a nul-terminated string constant.
    pub(crate) fn string_constant(&mut self, text: &str) -> Result<Value, Diagnostic> {
        let data_id = self.strings.data_id_for(self.module, text)?;
        let global_value = self.module.declare_data_in_func(data_id, self.builder.func);
        Ok(self.builder.ins().global_value(self.ptr_type, global_value))
    }

    /// Reference to a declared function, created lazily on first use so the
    /// emitted IR only mentions functions the body actually calls (and in a
    /// deterministic order).
    pub(crate) fn func_ref(&mut self, name: &str) -> Option<FuncRef> {
        if let Some(func_ref) = self.func_refs.get(name) {
            return Some(*func_ref);
        }
        let functions: &'a HashMap<String, DeclaredFunction> = self.functions;
        let function = functions.get(name)?;
        let func_ref = self.module.declare_func_in_func(function.id, self.builder.func);
        self.func_refs.insert(name.to_string(), func_ref);
        Some(func_ref)
    }

    pub(crate) fn declared_function(&self, name: &str) -> Option<&DeclaredFunction> {
        self.functions.get(name)
    }
}
