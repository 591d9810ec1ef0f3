use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The dynamic link pushed by `CALL` and consumed by the matching `RET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Address of the instruction following the `CALL`.
    pub return_pc: u64,
    /// The caller's base pointer.
    pub saved_bp: usize,
}

/// A mutable byte buffer living on the operand stack.
///
/// Cloning a `Bytes` yields another handle to the same storage, so a copy made by
/// `PUSHA` observes data a device later `READ`s into the original.
#[derive(Clone, Default)]
pub struct Bytes(Rc<RefCell<Vec<u8>>>);

impl Bytes {
    pub fn new(data: Vec<u8>) -> Self {
        Bytes(Rc::new(RefCell::new(data)))
    }

    /// A zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Bytes::new(vec![0; len])
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Copy the current contents out of the buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    /// Whether both handles share the same storage.
    pub fn ptr_eq(&self, other: &Bytes) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Append to the buffer, growing it.
    pub fn extend_from_slice(&self, data: &[u8]) {
        self.0.borrow_mut().extend_from_slice(data);
    }

    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.0.borrow())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(data: Vec<u8>) -> Self {
        Bytes::new(data)
    }
}

impl From<&[u8]> for Bytes {
    fn from(data: &[u8]) -> Self {
        Bytes::new(data.to_vec())
    }
}

impl From<&str> for Bytes {
    fn from(s: &str) -> Self {
        Bytes::new(s.as_bytes().to_vec())
    }
}

/// Buffers compare by content, not identity.
impl PartialEq for Bytes {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.0.borrow() == *other.0.borrow()
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0.borrow()))
    }
}

/// A value on the operand stack.
#[derive(Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bytes(Bytes),
    Frame(Frame),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<Frame> {
        match self {
            Value::Frame(f) => Some(*f),
            _ => None,
        }
    }

    /// Get the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bytes(_) => "bytes",
            Value::Frame(_) => "frame",
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Bytes(b) => write!(f, "Bytes({:?})", b),
            Value::Frame(fr) => write!(f, "Frame(pc={:#x}, bp={})", fr.return_pc, fr.saved_bp),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Bytes(b) => write!(f, "{:?}", b),
            Value::Frame(fr) => write!(f, "<frame ret={:#x} bp={}>", fr.return_pc, fr.saved_bp),
        }
    }
}
