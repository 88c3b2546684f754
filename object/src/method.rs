use std::rc::Rc;

use crate::block::Block;
use crate::symbol::Symbol;
use crate::value::Value;

/// How a compiled method validates and binds its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallConvention {
    /// Exactly `argc` arguments.
    Plain,
    /// Between `argc - defaults` and `argc`; execution starts past the
    /// initializers of the supplied optional arguments.
    WithDefaults,
    /// At least `argc - 1`; the rest are packed into an array bound to the
    /// last parameter.
    WithSplat,
}

impl CallConvention {
    /// Pick the convention a block's signature calls for.
    pub fn for_block(block: &Block) -> Self {
        if block.arg_splat {
            CallConvention::WithSplat
        } else if !block.defaults.is_empty() {
            CallConvention::WithDefaults
        } else {
            CallConvention::Plain
        }
    }
}

pub enum MethodBody {
    /// A primitive, by index into the VM's primitive table. `arity` is
    /// `None` for variadic primitives.
    Native { index: usize, arity: Option<u8> },
    Compiled {
        block: Rc<Block>,
        convention: CallConvention,
    },
}

pub struct Method {
    pub name: Symbol,
    /// Lexical class the body runs in: the class or module a native method
    /// was installed on, or the one enclosing a compiled method's `def`.
    pub owner: Value,
    pub body: MethodBody,
}

impl Method {
    pub fn native(name: Symbol, owner: Value, index: usize, arity: Option<u8>) -> Rc<Self> {
        Rc::new(Self {
            name,
            owner,
            body: MethodBody::Native { index, arity },
        })
    }

    pub fn compiled(name: Symbol, owner: Value, block: Rc<Block>) -> Rc<Self> {
        let convention = CallConvention::for_block(&block);
        Rc::new(Self {
            name,
            owner,
            body: MethodBody::Compiled { block, convention },
        })
    }
}
