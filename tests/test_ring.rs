use palisade::ring::{page_size, RingBuffer, MIRROR_COUNT};

#[test]
fn test_create_rounds_up_to_page_size() {
    let page = page_size();

    let buf = RingBuffer::create(1).unwrap();
    assert_eq!(buf.len(), page);

    let buf = RingBuffer::create(page).unwrap();
    assert_eq!(buf.len(), page);

    let buf = RingBuffer::create(page + 1).unwrap();
    assert_eq!(buf.len(), 2 * page);
}

#[test]
fn test_windows_alias_the_same_pages() {
    let mut buf = RingBuffer::create(1).unwrap();
    let n = buf.len();

    for (i, value) in [(0usize, 0xa5u8), (1, 0x5a), (n / 2, 1), (n - 1, 0xff)] {
        buf[i] = value;
        assert_eq!(buf[i], value);
        assert_eq!(buf[i + n], value);
        assert_eq!(buf[i + 2 * n], value);
    }
}

#[test]
fn test_write_through_second_window_visible_in_first() {
    let mut buf = RingBuffer::create(1).unwrap();
    let n = buf.len();

    buf[n + 7] = 42;
    assert_eq!(buf[7], 42);

    buf[2 * n + 9] = 43;
    assert_eq!(buf[9], 43);
    assert_eq!(buf[n + 9], 43);
}

#[test]
fn test_token_across_wrap_boundary_is_contiguous() {
    let mut buf = RingBuffer::create(1).unwrap();
    let n = buf.len();

    // Five bytes starting two before the wrap point.
    buf.slice_mut(n - 2, 5).copy_from_slice(b"hello");

    assert_eq!(buf.slice(n - 2, 5), b"hello");
    // The tail of the token is the same memory as the ring start.
    assert_eq!(buf[0], b'l');
    assert_eq!(buf[1], b'l');
    assert_eq!(buf[2], b'o');
}

#[test]
fn test_is_in_range_bounds() {
    let buf = RingBuffer::create(1).unwrap();
    let n = buf.len();

    assert!(buf.is_in_range(0));
    assert!(buf.is_in_range(MIRROR_COUNT * n - 1));
    assert!(!buf.is_in_range(MIRROR_COUNT * n));
}

#[test]
fn test_normalized_index() {
    let buf = RingBuffer::create(1).unwrap();
    let n = buf.len();

    assert_eq!(buf.normalized_index(3), 3);
    assert_eq!(buf.normalized_index(n), 0);
    assert_eq!(buf.normalized_index(n + 5), 5);
    assert_eq!(buf.normalized_index(2 * n + 7), 7);
}
