//! Real-time safety of the render step
//!
//! A counting global allocator watches the test thread while `render` runs,
//! so any allocation or free inside the callback path fails the test.
#![allow(unsafe_code)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::thread::LocalKey;

use readaloud::voice::renderer::{self, DEFAULT_COMMAND_CAPACITY, DEFAULT_REPORT_CAPACITY};

thread_local! {
    static ARMED: Cell<bool> = const { Cell::new(false) };
    static ALLOCS: Cell<usize> = const { Cell::new(0) };
    static FREES: Cell<usize> = const { Cell::new(0) };
}

fn bump(counter: &'static LocalKey<Cell<usize>>) {
    if ARMED.try_with(Cell::get).unwrap_or(false) {
        let _ = counter.try_with(|c| c.set(c.get() + 1));
    }
}

struct CountingAlloc;

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        bump(&ALLOCS);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        bump(&FREES);
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        bump(&ALLOCS);
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static ALLOCATOR: CountingAlloc = CountingAlloc;

/// Run `f` and count the allocations and frees it makes on this thread
fn counted<T>(f: impl FnOnce() -> T) -> (T, usize, usize) {
    ALLOCS.with(|c| c.set(0));
    FREES.with(|c| c.set(0));
    ARMED.with(|armed| armed.set(true));
    let value = f();
    ARMED.with(|armed| armed.set(false));
    (value, ALLOCS.with(Cell::get), FREES.with(Cell::get))
}

#[tokio::test]
async fn test_render_step_does_not_allocate() {
    let (handle, mut renderer, _reports) =
        renderer::channel(DEFAULT_COMMAND_CAPACITY, DEFAULT_REPORT_CAPACITY);
    let mut out = vec![0.0_f32; 1024];

    handle.append(vec![0.25; 1000]).await.unwrap();
    renderer.render(&mut out[..256], 1);
    assert_eq!(renderer.buffered(), 744);

    // Picks up a large append and plays across the segment boundary
    handle.append(vec![0.5; 100_000]).await.unwrap();
    let (report, allocs, frees) = counted(|| renderer.render(&mut out, 1));
    assert_eq!((allocs, frees), (0, 0), "render step touched the heap");
    assert_eq!(report.consumed, 1024);
    assert!(out[..744].iter().all(|&s| s == 0.25));
    assert!(out[744..].iter().all(|&s| s == 0.5));
    assert_eq!(handle.release_spent(), 1);

    // Reset discards the large segment without freeing it here
    handle.reset(2).await.unwrap();
    let (report, allocs, frees) = counted(|| renderer.render(&mut out, 1));
    assert_eq!((allocs, frees), (0, 0), "reset touched the heap");
    assert!(report.silent);
    assert_eq!(report.epoch, 2);

    // Freed on this side instead
    assert_eq!(handle.release_spent(), 1);
}

#[tokio::test]
async fn test_stereo_render_does_not_allocate() {
    let (handle, mut renderer, _reports) =
        renderer::channel(DEFAULT_COMMAND_CAPACITY, DEFAULT_REPORT_CAPACITY);
    let mut out = vec![0.0_f32; 512];

    handle.append(vec![0.5; 100]).await.unwrap();
    handle.append(vec![-0.5; 100]).await.unwrap();
    handle.append(Vec::new()).await.unwrap();
    let (report, allocs, frees) = counted(|| renderer.render(&mut out, 2));

    assert_eq!((allocs, frees), (0, 0), "render step touched the heap");
    assert_eq!(report.frames, 256);
    assert_eq!(report.consumed, 200);
    assert!(out[..200].iter().all(|&s| s == 0.5));
    assert!(out[200..400].iter().all(|&s| s == -0.5));
    assert!(out[400..].iter().all(|&s| s == 0.0));
}
