use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::Error;
use crate::ast::{BuiltinFn, Lambda, Procedure, Value};
use crate::builtinops::Arity;

/// Every scope created under one root, held weakly
type FrameRegistry = Rc<RefCell<Vec<Weak<Frame>>>>;

/// One scope's bindings plus the scope it was created in.
/// The parent link is fixed at creation; only the bindings mutate.
#[derive(Default)]
struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
    /// Shared by the whole tree so the root can reach scopes only closures hold
    registry: FrameRegistry,
}

impl Frame {
    fn register(frame: &Rc<Frame>) {
        let mut frames = frame.registry.borrow_mut();
        if frames.len() == frames.capacity() {
            frames.retain(|weak| weak.strong_count() > 0);
        }
        frames.push(Rc::downgrade(frame));
    }

    fn take_bindings(&self) {
        // Take the values out first: dropping them may drop other frames
        let bindings = mem::take(&mut *self.bindings.borrow_mut());
        drop(bindings);
    }
}

/// Environment for variable bindings
///
/// A cheap handle to a shared scope: cloning an `Environment` yields another
/// handle to the same bindings, which is how closures capture the scope they
/// were defined in. A `define` made after a closure was created is therefore
/// visible to it, as long as the name is bound by the time it is looked up.
///
/// A closure bound in the scope it captures forms a reference cycle with that
/// scope. [`Environment::release_unreachable`] frees such cycles once nothing
/// outside the tree refers to them, and [`Environment::clear`] tears the whole
/// tree down.
#[derive(Clone)]
pub struct Environment {
    frame: Rc<Frame>,
}

/// One entry of an environment listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    /// Kind of the bound value (`number`, `boolean`, `builtin`, `procedure`)
    pub kind: &'static str,
    /// Printable form of the bound value
    pub rendering: String,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {} = {}", self.name, self.kind, self.rendering)
    }
}

impl Environment {
    /// Create an empty root environment
    pub fn new() -> Self {
        let frame = Rc::new(Frame::default());
        Frame::register(&frame);
        Environment { frame }
    }

    /// Create an empty child scope of `parent`
    pub fn with_parent(parent: &Environment) -> Self {
        let frame = Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            registry: Rc::clone(&parent.frame.registry),
        });
        Frame::register(&frame);
        Environment { frame }
    }

    /// True for the root of a chain
    pub fn is_global(&self) -> bool {
        self.frame.parent.is_none()
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.frame.parent.as_ref()
    }

    /// Whether both handles refer to the same scope
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.frame, &other.frame)
    }

    /// Look `name` up in this scope, then in each ancestor
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.frame.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            scope = scope.frame.parent.as_ref()?;
        }
    }

    /// Whether `name` is bound in this scope itself (ancestors are ignored)
    pub fn is_bound_locally(&self, name: &str) -> bool {
        self.frame.bindings.borrow().contains_key(name)
    }

    /// Introduce a new binding in this scope.
    ///
    /// Fails with `DuplicateDefinition` if this scope already binds `name`;
    /// bindings of the same name in ancestor scopes are shadowed, not touched.
    pub fn define(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut bindings = self.frame.bindings.borrow_mut();
        if bindings.contains_key(name) {
            return Err(Error::DuplicateDefinition(name.to_owned()));
        }
        bindings.insert(name.to_owned(), value);
        Ok(())
    }

    /// Bind without the duplicate check (parameters, builtin registration)
    pub(crate) fn bind(&self, name: String, value: Value) {
        self.frame.bindings.borrow_mut().insert(name, value);
    }

    /// Replace the value of the nearest existing binding of `name`
    pub fn set(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut scope = self;
        loop {
            if let Some(slot) = scope.frame.bindings.borrow_mut().get_mut(name) {
                *slot = value;
                return Ok(());
            }
            match scope.frame.parent.as_ref() {
                Some(parent) => scope = parent,
                None => return Err(Error::UndefinedVariable(name.to_owned())),
            }
        }
    }

    /// Drop every binding of every live scope in this environment's tree,
    /// from the root down to call frames retained by closures.
    ///
    /// Handles into the tree stay valid but see no bindings afterwards.
    pub fn clear(&self) {
        let frames: Vec<Rc<Frame>> = self
            .frame
            .registry
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for frame in &frames {
            frame.take_bindings();
        }
    }

    /// Free scopes of this tree that only other scopes of the tree refer to,
    /// returning how many were cleared.
    ///
    /// A scope or procedure counts as held from outside when its reference
    /// count exceeds the references found in bindings, parent links and
    /// closures of the tree itself. Everything reachable from such a scope or
    /// procedure is kept; the bindings of every other scope are dropped, which
    /// breaks the closure cycles keeping them alive.
    pub fn release_unreachable(&self) -> usize {
        let frames: Vec<Rc<Frame>> = {
            let mut registry = self.frame.registry.borrow_mut();
            registry.retain(|weak| weak.strong_count() > 0);
            registry.iter().filter_map(Weak::upgrade).collect()
        };
        let index: HashMap<*const Frame, usize> = frames
            .iter()
            .enumerate()
            .map(|(i, frame)| (Rc::as_ptr(frame), i))
            .collect();
        let frame_index = |env: &Environment| index.get(&Rc::as_ptr(&env.frame)).copied();

        // Procedures bound anywhere in the tree, with the number of bindings holding each
        let mut lambdas: Vec<(Rc<Lambda>, usize)> = Vec::new();
        let mut lambda_index: HashMap<*const Lambda, usize> = HashMap::new();
        let mut frame_lambdas: Vec<Vec<usize>> = vec![Vec::new(); frames.len()];
        for (i, frame) in frames.iter().enumerate() {
            for value in frame.bindings.borrow().values() {
                if let Value::Procedure(Procedure::Lambda(lambda)) = value {
                    let next = lambdas.len();
                    let l = *lambda_index.entry(Rc::as_ptr(lambda)).or_insert(next);
                    if l == next {
                        lambdas.push((Rc::clone(lambda), 0));
                    }
                    lambdas[l].1 += 1;
                    frame_lambdas[i].push(l);
                }
            }
        }

        let mut internal = vec![0usize; frames.len()];
        for frame in &frames {
            if let Some(parent) = &frame.parent
                && let Some(p) = frame_index(parent)
            {
                internal[p] += 1;
            }
        }
        for (lambda, _) in &lambdas {
            if let Some(f) = frame_index(&lambda.env) {
                internal[f] += 1;
            }
        }

        // One strong count of each comes from the vectors above
        let mut pending_frames: Vec<usize> = (0..frames.len())
            .filter(|&f| Rc::strong_count(&frames[f]) > 1 + internal[f])
            .collect();
        let mut pending_lambdas: Vec<usize> = (0..lambdas.len())
            .filter(|&l| Rc::strong_count(&lambdas[l].0) > 1 + lambdas[l].1)
            .collect();

        let mut live_frames = vec![false; frames.len()];
        let mut live_lambdas = vec![false; lambdas.len()];
        loop {
            if let Some(l) = pending_lambdas.pop() {
                if !mem::replace(&mut live_lambdas[l], true)
                    && let Some(f) = frame_index(&lambdas[l].0.env)
                {
                    pending_frames.push(f);
                }
            } else if let Some(f) = pending_frames.pop() {
                if !mem::replace(&mut live_frames[f], true) {
                    pending_lambdas.extend(&frame_lambdas[f]);
                    if let Some(parent) = &frames[f].parent
                        && let Some(p) = frame_index(parent)
                    {
                        pending_frames.push(p);
                    }
                }
            } else {
                break;
            }
        }

        let mut released = 0;
        for (frame, live) in frames.iter().zip(&live_frames) {
            if !live {
                frame.take_bindings();
                released += 1;
            }
        }
        if released > 0 {
            debug!(released, scopes = frames.len(), "released unreachable scopes");
        }
        released
    }

    /// Register a native function as a builtin procedure in this scope.
    ///
    /// # Example
    /// ```
    /// use miniscm::Error;
    /// use miniscm::ast::Value;
    /// use miniscm::builtinops::Arity;
    /// use miniscm::evaluator::create_global_env;
    ///
    /// fn double(args: &[Value]) -> Result<Value, Error> {
    ///     match args {
    ///         [Value::Number(n)] => Ok(Value::Number(n * 2)),
    ///         _ => Err(Error::TypeMismatch("double requires a number".into())),
    ///     }
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("double", Arity::Exact(1), double);
    /// let result = miniscm::evaluate_source("(double 21)", &env).unwrap();
    /// assert_eq!(result, Value::Number(42));
    /// ```
    pub fn register_builtin_function(&self, name: &str, arity: Arity, func: BuiltinFn) {
        self.bind(
            name.to_owned(),
            Value::Procedure(Procedure::Builtin {
                name: name.to_owned(),
                arity,
                func,
            }),
        );
    }

    /// Get all bindings visible from this scope, sorted by name.
    /// A name bound in several scopes is listed once, with its innermost value.
    pub fn bindings(&self) -> Vec<Binding> {
        let mut visible = BTreeMap::new();
        let mut scope = Some(self);
        while let Some(env) = scope {
            for (name, value) in env.frame.bindings.borrow().iter() {
                visible
                    .entry(name.clone())
                    .or_insert_with(|| Binding {
                        name: name.clone(),
                        kind: value.type_name(),
                        rendering: value.to_string(),
                    });
            }
            scope = env.frame.parent.as_ref();
        }
        visible.into_values().collect()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl fmt::Debug for Environment {
    // Values are not printed: closures stored here point back at this scope.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.frame.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("parent", &self.frame.parent)
            .finish()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::val;

    #[test]
    fn test_define_and_lookup() {
        let env = Environment::new();
        assert!(env.is_global());
        env.define("x", val(5)).unwrap();
        assert_eq!(env.get("x"), Some(val(5)));
        assert_eq!(env.get("y"), None);
        assert_eq!(
            env.define("x", val(6)),
            Err(Error::DuplicateDefinition("x".into()))
        );
        assert_eq!(env.get("x"), Some(val(5)));
    }

    #[test]
    fn test_child_shadows_without_touching_parent() {
        let global = Environment::new();
        global.define("x", val(1)).unwrap();
        global.define("y", val(2)).unwrap();

        let local = Environment::with_parent(&global);
        assert!(!local.is_global());
        assert!(local.parent().unwrap().ptr_eq(&global));
        local.define("x", val(10)).unwrap();

        assert_eq!(local.get("x"), Some(val(10)));
        assert_eq!(local.get("y"), Some(val(2)));
        assert_eq!(global.get("x"), Some(val(1)));
        assert!(local.is_bound_locally("x"));
        assert!(!local.is_bound_locally("y"));
    }

    #[test]
    fn test_set_mutates_nearest_binding() {
        let global = Environment::new();
        global.define("x", val(1)).unwrap();
        let middle = Environment::with_parent(&global);
        middle.define("x", val(2)).unwrap();
        let inner = Environment::with_parent(&middle);

        inner.set("x", val(3)).unwrap();
        assert_eq!(middle.get("x"), Some(val(3)));
        assert_eq!(global.get("x"), Some(val(1)));

        global.define("z", val(0)).unwrap();
        inner.set("z", val(true)).unwrap();
        assert_eq!(global.get("z"), Some(val(true)));

        assert_eq!(
            inner.set("missing", val(1)),
            Err(Error::UndefinedVariable("missing".into()))
        );
        assert_eq!(inner.get("missing"), None);
    }

    #[test]
    fn test_clones_share_bindings() {
        let env = Environment::new();
        let captured = env.clone();
        env.define("late", val(7)).unwrap();
        assert_eq!(captured.get("late"), Some(val(7)));
        assert!(captured.ptr_eq(&env));
        assert!(!Environment::new().ptr_eq(&env));
    }

    #[test]
    fn test_bindings_listing() {
        let global = Environment::new();
        global.define("b", val(true)).unwrap();
        global.define("a", val(1)).unwrap();
        global.define("c", val(3)).unwrap();
        let local = Environment::with_parent(&global);
        local.define("c", val(30)).unwrap();

        let listing = local.bindings();
        let names: Vec<&str> = listing.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(listing[1].kind, "boolean");
        assert_eq!(listing[1].rendering, "#t");
        assert_eq!(listing[2].rendering, "30"); // Innermost binding wins
        assert_eq!(format!("{}", listing[0]), "a : number = 1");

        // Listing has no side effects
        assert_eq!(local.bindings(), listing);
    }

    #[test]
    fn test_clear_releases_captured_scope() {
        use crate::ast::{Lambda, Procedure, atom};
        use std::rc::Rc;

        let env = Environment::new();
        let lambda = Rc::new(Lambda {
            name: "f".into(),
            params: vec![],
            body: atom("1"),
            env: env.clone(),
        });
        let weak = Rc::downgrade(&lambda);
        env.define("f", Value::Procedure(Procedure::Lambda(lambda))).unwrap();
        assert!(weak.upgrade().is_some());

        env.clear();
        assert!(weak.upgrade().is_none());
        assert!(env.bindings().is_empty());
    }

    #[test]
    fn test_clear_reaches_retained_call_frames() {
        let env = crate::evaluator::create_global_env();
        crate::evaluate_source("(define (make-adder n) (define (add m) (+ m n)))", &env).unwrap();
        let add5 = crate::evaluate_source("(make-adder 5)", &env).unwrap();
        let Value::Procedure(Procedure::Lambda(lambda)) = &add5 else {
            panic!("expected a procedure, got {add5:?}");
        };
        let call_frame = lambda.env.clone();
        assert_eq!(call_frame.get("n"), Some(val(5)));

        env.clear();
        assert!(!call_frame.is_bound_locally("n"));
        assert!(!call_frame.is_bound_locally("add"));
        assert_eq!(env.get("+"), None);
    }

    #[test]
    fn test_release_unreachable_frees_dropped_call_frames() {
        let env = crate::evaluator::create_global_env();
        crate::evaluate_source("(define (make-adder n) (define (add m) (+ m n)))", &env).unwrap();
        crate::evaluate_source("(define add10 (make-adder 10))", &env).unwrap();
        let add5 = crate::evaluate_source("(make-adder 5)", &env).unwrap();
        let Value::Procedure(Procedure::Lambda(lambda)) = &add5 else {
            panic!("expected a procedure, got {add5:?}");
        };
        let weak = Rc::downgrade(lambda);

        // Held by the host
        assert_eq!(env.release_unreachable(), 0);
        assert!(weak.upgrade().is_some());

        drop(add5);
        assert!(weak.upgrade().is_some());
        assert_eq!(env.release_unreachable(), 1);
        assert!(weak.upgrade().is_none());

        // Closures reachable from the root keep their call frames
        assert_eq!(crate::evaluate_source("(add10 1)", &env), Ok(val(11)));
        assert_eq!(env.release_unreachable(), 0);
        assert!(env.get("make-adder").is_some());
    }

    #[test]
    fn test_register_builtin_function() {
        fn always_true(_: &[Value]) -> Result<Value, Error> {
            Ok(Value::Bool(true))
        }

        let env = Environment::new();
        env.register_builtin_function("yes", Arity::Exact(0), always_true);
        match env.get("yes").unwrap() {
            Value::Procedure(Procedure::Builtin { name, arity, .. }) => {
                assert_eq!(name, "yes");
                assert_eq!(arity, Arity::Exact(0));
            }
            other => panic!("expected builtin, got {other:?}"),
        }
    }
}
