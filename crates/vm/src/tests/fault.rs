use super::*;
use crate::{PageSource, VmError};
use std::format;

const CODE: Vaddr = Vaddr(0x0804_8000);

fn fault_at(addr: usize, cause: FaultCause) -> PageFault {
    PageFault::new(Vaddr(addr), cause, USER_SP)
}

#[test]
fn test_file_backed_fault_reads_and_zero_fills() {
    let fx = fixture(4, 4);
    let space = new_space(1, "scenario-a");
    let file = MemFile::patterned(3 * PAGE, 0x30);
    fx.vm
        .load_segment(&space, &as_vm_file(&file), 0x100, CODE, 1000, PAGE - 1000, true)
        .unwrap();

    let bytes = user_read(&fx.vm, &space, CODE, PAGE).unwrap();
    assert_eq!(&bytes[..1000], &file.contents()[0x100..0x100 + 1000]);
    assert!(bytes[1000..].iter().all(|&b| b == 0));

    let entry = space.spt().lock().lookup(CODE).cloned().unwrap();
    assert!(entry.loaded);
    let ppn = space.page_table().lock().translate(CODE).unwrap();
    assert_eq!(fx.vm.frames().binding(ppn), Some((1, Some(CODE))));
    assert_eq!(fx.vm.frames().is_pinned(ppn), Some(false));
}

#[test]
fn test_load_segment_splits_pages() {
    let fx = fixture(4, 4);
    let space = new_space(1, "segment");
    let file = MemFile::patterned(2 * PAGE, 0x01);
    fx.vm
        .load_segment(&space, &as_vm_file(&file), 0, CODE, PAGE + 500, 2 * PAGE - 500, false)
        .unwrap();

    {
        let spt = space.spt().lock();
        assert_eq!(spt.len(), 3);
        match &spt.lookup(CODE).unwrap().source {
            PageSource::File(s) => assert_eq!((s.offset, s.read_len, s.zero_len), (0, PAGE, 0)),
            other => panic!("unexpected source {:?}", other),
        }
        match &spt.lookup(CODE.add_pages(1)).unwrap().source {
            PageSource::File(s) => {
                assert_eq!((s.offset, s.read_len, s.zero_len), (PAGE, 500, PAGE - 500))
            }
            other => panic!("unexpected source {:?}", other),
        }
        assert!(matches!(
            spt.lookup(CODE.add_pages(2)).unwrap().source,
            PageSource::Zero
        ));
    }

    let second = user_read(&fx.vm, &space, CODE.add_pages(1), PAGE).unwrap();
    assert_eq!(&second[..500], &file.contents()[PAGE..PAGE + 500]);
    assert!(second[500..].iter().all(|&b| b == 0));

    let third = user_read(&fx.vm, &space, CODE.add_pages(2), PAGE).unwrap();
    assert!(third.iter().all(|&b| b == 0));
    assert!(space.spt().lock().lookup(CODE.add_pages(2)).is_none());
}

#[test]
fn test_load_segment_rejects_bad_layout() {
    let fx = fixture(1, 1);
    let space = new_space(1, "segment");
    let file = as_vm_file(&MemFile::patterned(PAGE, 0));
    assert_eq!(
        fx.vm.load_segment(&space, &file, 0, CODE, 100, 100, true),
        Err(VmError::InvalidArgument)
    );
    assert_eq!(
        fx.vm
            .load_segment(&space, &file, 0, Vaddr(CODE.0 + 4), PAGE, 0, true),
        Err(VmError::InvalidAddress)
    );
    assert_eq!(
        fx.vm
            .load_segment(&space, &file, 0, Vaddr(0xBFFF_F000), PAGE, PAGE, true),
        Err(VmError::InvalidAddress)
    );
}

#[test]
fn test_failed_file_read_never_maps_frame() {
    let fx = fixture(2, 2);
    let space = new_space(1, "ioerr");
    let file = MemFile::patterned(PAGE, 0);
    fx.vm
        .load_segment(&space, &as_vm_file(&file), 0, CODE, PAGE, 0, true)
        .unwrap();

    file.fail_reads.store(true, Ordering::SeqCst);
    let err = user_read(&fx.vm, &space, CODE, 1).unwrap_err();
    assert!(matches!(
        err,
        FaultError::Failed {
            cause: VmError::Io,
            ..
        }
    ));
    assert!(!is_mapped(&space, CODE));
    assert!(fx.vm.frames().is_empty());
    assert_eq!(fx.alloc.free_pages(), 2);
    assert!(!space.spt().lock().lookup(CODE).unwrap().loaded);

    file.fail_reads.store(false, Ordering::SeqCst);
    file.short_reads.store(true, Ordering::SeqCst);
    let err = user_read(&fx.vm, &space, CODE, 1).unwrap_err();
    assert!(matches!(
        err,
        FaultError::Failed {
            cause: VmError::ShortRead,
            ..
        }
    ));
    assert!(!is_mapped(&space, CODE));
    assert!(fx.vm.frames().is_empty());

    file.short_reads.store(false, Ordering::SeqCst);
    assert_eq!(user_read(&fx.vm, &space, CODE, 1).unwrap(), vec![0]);
}

#[test]
fn test_file_shorter_than_segment_is_short_read() {
    let fx = fixture(1, 1);
    let space = new_space(1, "truncated");
    let file = MemFile::patterned(100, 0);
    fx.vm
        .load_segment(&space, &as_vm_file(&file), 0, CODE, 200, PAGE - 200, true)
        .unwrap();
    let err = user_read(&fx.vm, &space, CODE, 1).unwrap_err();
    assert!(matches!(
        err,
        FaultError::Failed {
            cause: VmError::ShortRead,
            ..
        }
    ));
    assert!(!is_mapped(&space, CODE));
}

#[test]
fn test_write_to_read_only_page_is_rejected_before_install() {
    let fx = fixture(2, 2);
    let space = new_space(1, "scenario-d");
    let file = MemFile::patterned(PAGE, 0x77);
    fx.vm
        .load_segment(&space, &as_vm_file(&file), 0, CODE, PAGE, 0, false)
        .unwrap();

    let err = user_write(&fx.vm, &space, CODE, b"x").unwrap_err();
    assert!(matches!(err, FaultError::Illegal(_)));
    assert_eq!(err.exit_status(), -1);
    assert!(!is_mapped(&space, CODE));
    assert!(fx.vm.frames().is_empty());

    // 读入之后再写是保护错误
    assert_eq!(user_read(&fx.vm, &space, CODE, 1).unwrap(), vec![0x77]);
    let err = user_write(&fx.vm, &space, CODE, b"x").unwrap_err();
    assert!(matches!(err, FaultError::Illegal(f) if f.is_present()));
    assert_eq!(user_read(&fx.vm, &space, CODE, 1).unwrap(), vec![0x77]);
}

#[test]
fn test_stack_growth() {
    let fx = fixture(4, 4);
    let space = new_space(1, "scenario-e");
    let sp = Vaddr(0xBFFF_F000);

    let below = Vaddr(sp.0 - 4);
    with_page(&fx.vm, &space, below, true, sp, |bytes| {
        assert!(bytes.iter().all(|&b| b == 0));
    })
    .unwrap();
    assert!(is_mapped(&space, below.page_floor()));
    assert!(space.spt().lock().is_empty());
    assert_eq!(fx.vm.frames().len(), 1);

    // pusha 一次压入 32 字节
    let pusha = Vaddr(sp.0 - 32);
    assert!(with_page(&fx.vm, &space, pusha, true, sp, |_| ()).is_ok());

    // 栈指针之上、栈顶之下也可以增长
    let sp_low = Vaddr(0xBFF0_0000);
    assert!(with_page(&fx.vm, &space, Vaddr(0xBFF8_0010), false, sp_low, |_| ()).is_ok());
}

#[test]
fn test_stack_growth_limits() {
    let fx = fixture(2, 2);
    let space = new_space(1, "stack");
    let sp = Vaddr(0xBFFF_F000);

    let far_below = Vaddr(sp.0 - 64);
    let err = with_page(&fx.vm, &space, far_below, true, sp, |_| ()).unwrap_err();
    assert!(matches!(err, FaultError::Illegal(_)));

    // 超过 8 MiB 的栈上限
    let too_deep = Vaddr(0xC000_0000 - 9 * 1024 * 1024);
    let err = with_page(&fx.vm, &space, too_deep, true, too_deep, |_| ()).unwrap_err();
    assert!(matches!(err, FaultError::Illegal(_)));

    let deepest = Vaddr(0xC000_0000 - 8 * 1024 * 1024);
    assert!(with_page(&fx.vm, &space, deepest, true, deepest, |_| ()).is_ok());
    assert!(fx.vm.frames().len() == 1);
}

#[test]
fn test_unmapped_address_is_illegal() {
    let fx = fixture(1, 1);
    let space = new_space(1, "wild");
    let fault = fault_at(0x1000_0000, FaultCause::USER);
    let err = fx.vm.handle_page_fault(&space, &fault).unwrap_err();
    assert_eq!(err, FaultError::Illegal(fault));
    assert_eq!(
        format!("{}", fault),
        "Page fault at 0x10000000: not present error reading page in user context."
    );
    assert!(fx.vm.frames().is_empty());
}

#[test]
fn test_privilege_rules() {
    let fx = fixture(2, 2);
    let space = new_space(1, "priv");
    let file = MemFile::patterned(PAGE, 0x44);
    space.spt().lock().register_zero_fill(CODE, true).unwrap();
    let rodata = CODE.add_pages(1);
    fx.vm
        .load_segment(&space, &as_vm_file(&file), 0, rodata, PAGE, 0, false)
        .unwrap();

    // 内核态写可写的惰性页：系统调用向用户缓冲区拷贝
    let fault = fault_at(CODE.0, FaultCause::WRITE);
    assert_eq!(fx.vm.handle_page_fault(&space, &fault), Ok(()));
    assert!(is_mapped(&space, CODE));

    // 内核态写只读页
    let fault = fault_at(rodata.0, FaultCause::WRITE);
    assert_eq!(
        fx.vm.handle_page_fault(&space, &fault),
        Err(FaultError::Illegal(fault))
    );
    assert!(!is_mapped(&space, rodata));

    // 内核态读用户地址按普通缺页处理
    let fault = fault_at(rodata.0, FaultCause::empty());
    assert_eq!(fx.vm.handle_page_fault(&space, &fault), Ok(()));
    assert!(is_mapped(&space, rodata));

    // 没有任何来源的用户地址
    let wild = fault_at(0x3000_0000, FaultCause::WRITE);
    assert_eq!(
        fx.vm.handle_page_fault(&space, &wild),
        Err(FaultError::Illegal(wild))
    );

    let kernel = fault_at(0xC010_0000, FaultCause::empty());
    assert_eq!(
        fx.vm.handle_page_fault(&space, &kernel),
        Err(FaultError::KernelBug(kernel))
    );
    assert_eq!(
        format!("{}", kernel),
        "Page fault at 0xc0100000: not present error reading page in kernel context."
    );

    let user_kernel = fault_at(0xC010_0000, FaultCause::USER | FaultCause::WRITE);
    assert_eq!(
        fx.vm.handle_page_fault(&space, &user_kernel),
        Err(FaultError::Illegal(user_kernel))
    );
}

#[test]
fn test_kernel_write_to_swapped_page() {
    let fx = fixture(1, 4);
    let space = new_space(1, "syscall");
    let a = Vaddr(0x1000_0000);
    let b = a.add_pages(1);
    space.spt().lock().register_zero_fill(a, true).unwrap();
    space.spt().lock().register_zero_fill(b, true).unwrap();
    user_write(&fx.vm, &space, a, &[0x5A]).unwrap();
    user_write(&fx.vm, &space, b, &[0x6B]).unwrap();
    assert!(matches!(
        space.spt().lock().lookup(a).unwrap().source,
        PageSource::Swap { .. }
    ));

    let fault = fault_at(a.0, FaultCause::WRITE);
    assert_eq!(fx.vm.handle_page_fault(&space, &fault), Ok(()));
    assert!(is_mapped(&space, a));
    assert!(space.spt().lock().lookup(a).is_none());
    assert_eq!(user_read(&fx.vm, &space, a, 1).unwrap(), vec![0x5A]);
    assert_eq!(user_read(&fx.vm, &space, b, 1).unwrap(), vec![0x6B]);
}

#[test]
fn test_kernel_write_to_untouched_mmap_page() {
    let fx = fixture(2, 2);
    let space = new_space(1, "read-syscall");
    let file = MemFile::patterned(PAGE, 0x20);
    let map = Vaddr(0x2000_0000);
    fx.vm.mmap(&space, as_vm_file(&file), map).unwrap();

    let fault = fault_at(map.0 + 8, FaultCause::WRITE);
    assert_eq!(fx.vm.handle_page_fault(&space, &fault), Ok(()));
    assert!(is_mapped(&space, map));
    assert!(space.spt().lock().lookup(map).unwrap().loaded);
}

#[test]
fn test_capture_masks_interrupts_while_reading_address() {
    init_test_env();
    let before = MOCK_ARCH_OPS.disable_count.load(Ordering::SeqCst);
    let fault = PageFault::capture(|| 0x0804_8123, FaultCause::USER, USER_SP);
    assert!(MOCK_ARCH_OPS.disable_count.load(Ordering::SeqCst) > before);
    assert_eq!(fault.addr, Vaddr(0x0804_8123));
    assert!(fault.is_user());
    assert!(!fault.is_write());
}

#[test]
fn test_fault_on_loaded_page_is_illegal() {
    let fx = fixture(2, 2);
    let space = new_space(1, "loaded");
    let file = MemFile::patterned(PAGE, 0);
    fx.vm
        .load_segment(&space, &as_vm_file(&file), 0, CODE, PAGE, 0, true)
        .unwrap();
    user_read(&fx.vm, &space, CODE, 1).unwrap();

    let fault = fault_at(CODE.0, FaultCause::USER);
    assert_eq!(
        fx.vm.handle_page_fault(&space, &fault),
        Err(FaultError::Illegal(fault))
    );
    assert_eq!(fx.vm.frames().len(), 1);
}

#[test]
fn test_swap_round_trip_through_faults() {
    let fx = fixture(1, 4);
    let space = new_space(1, "scenario-c");
    let a = Vaddr(0x1000_0000);
    let b = Vaddr(0x1000_1000);
    space.spt().lock().register_zero_fill(a, true).unwrap();
    space.spt().lock().register_zero_fill(b, true).unwrap();

    let pattern: Vec<u8> = (0..PAGE).map(|i| (i * 7 % 256) as u8).collect();
    with_page(&fx.vm, &space, a, true, USER_SP, |bytes| {
        bytes.copy_from_slice(&pattern)
    })
    .unwrap();
    user_write(&fx.vm, &space, b, b"bbbb").unwrap();

    // a 被换出
    assert!(!is_mapped(&space, a));
    assert_eq!(fx.vm.swap().free_slots(), 3);
    let slot = space.spt().lock().lookup(a).unwrap().swap_slot().unwrap();
    assert!(fx.vm.swap().is_reserved(slot));

    let back = user_read(&fx.vm, &space, a, PAGE).unwrap();
    assert_eq!(back, pattern);
    // a 的槽位已释放、表项已删除；b 现在占着一个槽位
    assert!(space.spt().lock().lookup(a).is_none());
    assert_eq!(fx.vm.swap().free_slots(), 3);
    assert!(space.spt().lock().lookup(b).unwrap().swap_slot().is_some());

    assert_eq!(user_read(&fx.vm, &space, b, 4).unwrap(), b"bbbb".to_vec());
}

#[test]
fn test_swapped_file_page_comes_back_dirty() {
    let fx = fixture(1, 4);
    let space = new_space(1, "file-swap");
    let file = MemFile::patterned(PAGE, 0);
    fx.vm
        .load_segment(&space, &as_vm_file(&file), 0, CODE, PAGE, 0, true)
        .unwrap();
    user_write(&fx.vm, &space, CODE, b"modified").unwrap();

    let other = Vaddr(0x1000_0000);
    space.spt().lock().register_zero_fill(other, true).unwrap();
    user_read(&fx.vm, &space, other, 1).unwrap();

    assert!(matches!(
        space.spt().lock().lookup(CODE).unwrap().source,
        PageSource::FileSwapped { writable: true, .. }
    ));

    assert_eq!(user_read(&fx.vm, &space, CODE, 8).unwrap(), b"modified".to_vec());
    let entry = space.spt().lock().lookup(CODE).cloned().unwrap();
    assert!(entry.loaded);
    assert!(entry.is_file_backed());
    assert!(space.page_table().lock().is_dirty(CODE));
    // 文件本身没有被修改
    assert_eq!(file.contents()[0], 0);
}

#[test]
fn test_swap_read_failure_keeps_entry() {
    let fx = fixture(1, 4);
    let space = new_space(1, "swap-ioerr");
    let a = Vaddr(0x1000_0000);
    let b = Vaddr(0x1000_1000);
    space.spt().lock().register_zero_fill(a, true).unwrap();
    space.spt().lock().register_zero_fill(b, true).unwrap();
    user_write(&fx.vm, &space, a, b"keep").unwrap();
    user_write(&fx.vm, &space, b, b"evict").unwrap();
    let slot = space.spt().lock().lookup(a).unwrap().swap_slot().unwrap();

    fx.swap_faults.fail_reads.store(true, Ordering::SeqCst);
    let err = user_read(&fx.vm, &space, a, 4).unwrap_err();
    assert!(matches!(
        err,
        FaultError::Failed {
            cause: VmError::Io,
            ..
        }
    ));
    assert!(!is_mapped(&space, a));
    assert!(fx.vm.swap().is_reserved(slot));
    assert_eq!(
        space.spt().lock().lookup(a).unwrap().swap_slot(),
        Some(slot)
    );

    fx.swap_faults.fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(user_read(&fx.vm, &space, a, 4).unwrap(), b"keep".to_vec());
}

#[test]
fn test_exhaustion_fails_only_the_faulting_access() {
    let fx = fixture(1, 4);
    let space = new_space(1, "pinned");
    let a = Vaddr(0x1000_0000);
    space.spt().lock().register_zero_fill(a, true).unwrap();
    space
        .spt()
        .lock()
        .register_zero_fill(Vaddr(0x1000_1000), true)
        .unwrap();
    user_write(&fx.vm, &space, a, b"a").unwrap();
    let ppn = space.page_table().lock().translate(a).unwrap();
    fx.vm.frames().pin(ppn);

    let err = user_read(&fx.vm, &space, Vaddr(0x1000_1000), 1).unwrap_err();
    assert!(matches!(
        err,
        FaultError::Failed {
            cause: VmError::NoEvictableFrame,
            ..
        }
    ));
    assert_eq!(user_read(&fx.vm, &space, a, 1).unwrap(), b"a".to_vec());
}
