use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::Error;
use crate::builtinops::BuiltinOp;
use crate::value::Value;

#[derive(Clone, Default)]
struct Scope {
    bindings: HashMap<String, Value>,
    /// Lexically enclosing scope. Non-owning: the enclosing frame outlives every
    /// evaluation that walks through this link.
    parent: Option<Weak<RefCell<Scope>>>,
}

impl Scope {
    fn parent(&self) -> Option<Rc<RefCell<Scope>>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }
}

/// Environment for variable bindings
///
/// An environment is a symbol table plus a non-owning link to the enclosing scope.
/// The global environment has no parent. Each environment is exclusively owned by
/// one closure or call frame; `Clone` produces an independent copy with deep-copied
/// bindings and the same parent link, so cloning a closure never aliases its scope.
pub struct Environment {
    scope: Rc<RefCell<Scope>>,
}

impl Environment {
    /// Create an empty environment with no parent
    pub fn new() -> Self {
        Environment {
            scope: Rc::new(RefCell::new(Scope::default())),
        }
    }

    /// Look `name` up from this scope outwards, returning a copy of the first binding
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        let mut current = Rc::clone(&self.scope);
        loop {
            let next = {
                let scope = current.borrow();
                if let Some(value) = scope.bindings.get(name) {
                    return Ok(value.clone());
                }
                scope.parent()
            };
            match next {
                Some(parent) => current = parent,
                None => return Err(Error::UnboundSymbol(name.to_owned())),
            }
        }
    }

    /// Bind `name` in this scope only, shadowing any outer binding
    pub fn put(&self, name: impl Into<String>, value: Value) {
        self.scope.borrow_mut().bindings.insert(name.into(), value);
    }

    /// Bind `name` in the root of the chain, regardless of current depth
    pub fn def(&self, name: impl Into<String>, value: Value) {
        self.root().borrow_mut().bindings.insert(name.into(), value);
    }

    /// Point this environment's parent at `parent` (non-owning)
    pub fn set_parent(&self, parent: &Environment) {
        self.scope.borrow_mut().parent = Some(Rc::downgrade(&parent.scope));
    }

    /// True when this environment has no (live) enclosing scope
    pub fn is_root(&self) -> bool {
        self.scope.borrow().parent().is_none()
    }

    fn root(&self) -> Rc<RefCell<Scope>> {
        let mut current = Rc::clone(&self.scope);
        loop {
            let next = current.borrow().parent();
            match next {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    /// True when any binding in this scope alone (not its parents) satisfies `predicate`
    pub(crate) fn any_binding(&self, predicate: impl FnMut(&Value) -> bool) -> bool {
        self.scope.borrow().bindings.values().any(predicate)
    }

    /// Register a native primitive under its registry name
    ///
    /// # Example
    /// ```
    /// use lispy::builtinops::{Arity, BuiltinOp};
    /// use lispy::environment::Environment;
    /// use lispy::evaluator::Context;
    /// use lispy::{Error, Value};
    ///
    /// fn answer(_: &mut Context, _: &Environment, _: Vec<Value>) -> Result<Value, Error> {
    ///     Ok(Value::num(42))
    /// }
    ///
    /// static ANSWER: BuiltinOp = BuiltinOp {
    ///     name: "answer",
    ///     arity: Arity::Exact(0),
    ///     func: answer,
    /// };
    ///
    /// let env = Environment::new();
    /// env.register_builtin(&ANSWER);
    /// assert!(env.get("answer").is_ok());
    /// ```
    pub fn register_builtin(&self, op: &'static BuiltinOp) {
        self.put(op.name, Value::native(op));
    }

    /// Get all bindings visible from this environment, inner scopes shadowing outer ones
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut chain = vec![Rc::clone(&self.scope)];
        while let Some(parent) = chain.last().and_then(|scope| scope.borrow().parent()) {
            chain.push(parent);
        }

        let mut bindings = HashMap::new();
        // Outermost first so inner bindings override
        for scope in chain.iter().rev() {
            for (name, value) in &scope.borrow().bindings {
                bindings.insert(name.clone(), value.clone());
            }
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Environment {
    fn clone(&self) -> Self {
        Environment {
            scope: Rc::new(RefCell::new(self.scope.borrow().clone())),
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.scope.borrow();
        let mut names: Vec<&String> = scope.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_parent", &scope.parent().is_some())
            .finish()
    }
}
