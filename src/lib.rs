mod buffer_pool;
mod cursor;
mod disk_manager;
mod error;
mod key;
mod page;
mod tree;

pub use cursor::Breadcrumb;
pub use error::Error;
pub use key::{Key, Value};
pub use page::PageId;
pub use tree::{Tree, TreeIter};

/// Debug-only tracing of page fetches/pins/evictions, gated on
/// `debug_assertions` so release builds pay nothing for it. Grounded on
/// the teacher's `printdbg!` in `lib.rs`.
#[macro_export]
macro_rules! printdbg {
    ($val: expr $(, $args: expr)*) => {
        #[cfg(debug_assertions)]
        println!($val $(, $args)*)
    };
}

/// Resolves the immediate caller's symbol name from the current
/// backtrace, for `printdbg!` call sites that want to attribute a page
/// operation to whichever `Tree`/`BufferPool` method triggered it.
/// Grounded on the teacher's `get_caller_name!` in `lib.rs`.
#[macro_export]
macro_rules! get_caller_name {
    () => {{
        #[cfg(debug_assertions)]
        {
            let mut bt = backtrace::Backtrace::new_unresolved();
            bt.resolve();
            let frames = bt.frames();
            if frames.len() > 1 {
                let caller_frame = &frames[1];
                if let Some(symbol) = caller_frame.symbols().first() {
                    if let Some(name) = symbol.name() {
                        name.to_string()
                    } else {
                        "<unknown caller>".to_string()
                    }
                } else {
                    "<unknown caller>".to_string()
                }
            } else {
                "<no caller>".to_string()
            }
        }
        #[cfg(not(debug_assertions))]
        {
            ""
        }
    }};
}
