//! Small shared helpers, in the teacher crate's `linux::util` idiom.

pub type Pid = libc::pid_t;
