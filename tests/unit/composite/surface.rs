use super::*;

fn desc(w: u32, h: u32) -> SurfaceDesc {
    SurfaceDesc {
        width: w,
        height: h,
        format: PixelFormat::Rgba8,
    }
}

#[test]
fn pool_allocates_lazily_up_to_capacity() {
    let pool = SurfacePool::new(desc(4, 4), 2).unwrap();
    let a = pool.acquire(Duration::ZERO).unwrap();
    let b = pool.acquire(Duration::ZERO).unwrap();
    assert_eq!(a.as_bytes().len(), 4 * 4 * 4);
    assert_eq!(pool.stats().allocated, 2);

    let err = pool.acquire(Duration::from_millis(5)).unwrap_err();
    assert!(matches!(err, ImgseqError::ProtocolViolation(_)));

    drop(a);
    let _c = pool.acquire(Duration::ZERO).unwrap();
    drop(b);
    let st = pool.stats();
    assert_eq!(st.allocated, 2);
    assert_eq!(st.reused, 1);
    assert_eq!(st.available, 1);
}

#[test]
fn acquire_blocks_until_a_surface_returns() {
    let pool = SurfacePool::new(desc(2, 2), 1).unwrap();
    let held = pool.acquire(Duration::ZERO).unwrap();

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
    });
    let again = pool.acquire(Duration::from_secs(5)).unwrap();
    releaser.join().unwrap();
    assert_eq!(again.desc(), desc(2, 2));
    assert_eq!(pool.stats().allocated, 1);
}

#[test]
fn surfaces_are_reused_not_reallocated() {
    let pool = SurfacePool::new(desc(2, 2), 1).unwrap();
    {
        let mut s = pool.acquire(Duration::ZERO).unwrap();
        s.lock().pixels_mut()[0] = 42;
    }
    let s = pool.acquire(Duration::ZERO).unwrap();
    assert_eq!(s.as_bytes()[0], 42);
}

#[test]
fn dropping_after_pool_teardown_is_counted() {
    let pool = SurfacePool::new(desc(2, 2), 1).unwrap();
    let s = pool.acquire(Duration::ZERO).unwrap();
    let counters = Arc::clone(&pool.counters);
    drop(pool);
    drop(s);
    assert_eq!(counters.dropped_on_release.load(Ordering::Relaxed), 1);
}

#[test]
fn zero_capacity_is_rejected() {
    assert!(SurfacePool::new(desc(2, 2), 0).is_err());
    assert!(SurfacePool::new(desc(0, 2), 1).is_err());
}
