//! 地址与对象引用之间的转换工具
//!
//! 内核对象之间通过物理地址互相引用（侵入式队列、blocking_object 等），
//! 使用时再转换回引用。地址 0 表示空。

/// 把地址转换为不可变引用，地址必须非 0
#[inline]
pub fn convert_to_type_ref<T>(addr: usize) -> &'static T {
    assert_ne!(addr, 0);
    unsafe { &*(addr as *const T) }
}

/// 把地址转换为可变引用，地址必须非 0
#[inline]
pub fn convert_to_mut_type_ref<T>(addr: usize) -> &'static mut T {
    assert_ne!(addr, 0);
    unsafe { &mut *(addr as *mut T) }
}

/// 把地址转换为可变引用，地址为 0 时返回 [`Option::None`]
#[inline]
pub fn convert_to_option_mut_type_ref<T>(addr: usize) -> Option<&'static mut T> {
    if addr == 0 {
        return None;
    }
    Some(convert_to_mut_type_ref::<T>(addr))
}

/// 把地址转换为不可变引用，地址为 0 时返回 [`Option::None`]
#[inline]
pub fn convert_to_option_type_ref<T>(addr: usize) -> Option<&'static T> {
    if addr == 0 {
        return None;
    }
    Some(convert_to_type_ref::<T>(addr))
}
