// vm 的单元测试。
//
// 在宿主机上用标准 `cargo test` 运行：物理内存是泄漏出来的堆内存，
// 页表、文件和交换设备都是内存中的模拟实现。用户态访存由 `with_page`
// 模拟：查页表，未映射就走缺页处理，然后在持有页表锁的情况下读写页内容并设置访问位与脏位。

use crate::{
    AddressSpace, BitmapPageAllocator, FaultCause, FaultError, PageAllocator, PageFault, PageTable,
    PagingError, PagingResult, Ppn, PteFlags, RamSwapDevice, SECTOR_SIZE, SwapDevice, Vaddr,
    VmConfig, VmFile, VmManager,
};
use std::boxed::Box;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::vec;
use std::vec::Vec;
use test_support::mock::arch::{MOCK_ARCH_OPS, MockArchOps};
use test_support::mock::vm::{MOCK_VM_CONFIG, MockVmConfig};

mod fault;

pub(crate) const PAGE: usize = 4096;

/// 远离任何测试地址的用户栈指针
pub(crate) const USER_SP: Vaddr = Vaddr(0xBFFF_F000);

struct TestArchOps(&'static MockArchOps);

impl sync::ArchOps for TestArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { self.0.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { self.0.restore_interrupts(flags) }
    }

    fn intr_enable_mask(&self) -> usize {
        self.0.intr_enable_mask()
    }
}

impl VmConfig for MockVmConfig {
    fn page_size(&self) -> usize {
        MockVmConfig::page_size(self)
    }

    fn user_space_end(&self) -> usize {
        MockVmConfig::user_space_end(self)
    }

    fn user_stack_top(&self) -> usize {
        MockVmConfig::user_stack_top(self)
    }

    fn max_stack_size(&self) -> usize {
        MockVmConfig::max_stack_size(self)
    }

    fn stack_slack(&self) -> usize {
        MockVmConfig::stack_slack(self)
    }
}

static TEST_ARCH_OPS: TestArchOps = TestArchOps(&MOCK_ARCH_OPS);
static INIT: Once = Once::new();

/// 注册架构操作与配置，所有测试共用同一份静态实例
pub(crate) fn init_test_env() {
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&TEST_ARCH_OPS);
        crate::register_config(&MOCK_VM_CONFIG);
    });
}

/// 泄漏 `pages` 页堆内存充当物理内存
pub(crate) fn leak_pages(pages: usize) -> (NonNull<u8>, usize) {
    let memory: &'static mut [u8] = vec![0xAAu8; pages * PAGE].leak();
    (NonNull::new(memory.as_mut_ptr()).unwrap(), pages)
}

// ============================================================================
// 页表
// ============================================================================

#[derive(Default)]
pub(crate) struct MockPageTable {
    entries: HashMap<Vaddr, (Ppn, PteFlags)>,
}

impl PageTable for MockPageTable {
    fn install(&mut self, va: Vaddr, ppn: Ppn, writable: bool) -> PagingResult<()> {
        if self.entries.contains_key(&va) {
            return Err(PagingError::AlreadyMapped);
        }
        let mut flags = PteFlags::VALID | PteFlags::USER;
        flags.set(PteFlags::WRITABLE, writable);
        self.entries.insert(va, (ppn, flags));
        Ok(())
    }

    fn clear(&mut self, va: Vaddr) {
        self.entries.remove(&va);
    }

    fn translate(&self, va: Vaddr) -> Option<Ppn> {
        self.entries.get(&va).map(|(ppn, _)| *ppn)
    }

    fn flags(&self, va: Vaddr) -> Option<PteFlags> {
        self.entries.get(&va).map(|(_, flags)| *flags)
    }

    fn set_dirty(&mut self, va: Vaddr, dirty: bool) {
        if let Some((_, flags)) = self.entries.get_mut(&va) {
            flags.set(PteFlags::DIRTY, dirty);
        }
    }

    fn set_accessed(&mut self, va: Vaddr, accessed: bool) {
        if let Some((_, flags)) = self.entries.get_mut(&va) {
            flags.set(PteFlags::ACCESSED, accessed);
        }
    }
}

// ============================================================================
// 文件
// ============================================================================

/// 内存文件，可以让读取失败或只读一半
pub(crate) struct MemFile {
    data: Mutex<Vec<u8>>,
    pub fail_reads: AtomicBool,
    pub short_reads: AtomicBool,
    pub writes: AtomicUsize,
}

impl MemFile {
    pub(crate) fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(MemFile {
            data: Mutex::new(data),
            fail_reads: AtomicBool::new(false),
            short_reads: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    }

    /// 长度为 `len`、第 i 个字节为 `seed + i` 的文件
    pub(crate) fn patterned(len: usize, seed: u8) -> Arc<Self> {
        Self::new((0..len).map(|i| seed.wrapping_add(i as u8)).collect())
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl VmFile for MemFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(-5);
        }
        let data = self.data.lock().unwrap();
        if offset >= data.len() {
            return Ok(0);
        }
        let mut n = buf.len().min(data.len() - offset);
        if self.short_reads.load(Ordering::SeqCst) {
            n /= 2;
        }
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        if offset + buf.len() > data.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }
}

pub(crate) fn as_vm_file(file: &Arc<MemFile>) -> Arc<dyn VmFile> {
    file.clone()
}

// ============================================================================
// 交换设备
// ============================================================================

/// 可以注入读写失败的交换设备
pub(crate) struct FlakySwapDevice {
    inner: RamSwapDevice,
    faults: SwapFaults,
}

#[derive(Clone, Default)]
pub(crate) struct SwapFaults {
    pub fail_writes: Arc<AtomicBool>,
    pub fail_reads: Arc<AtomicBool>,
}

impl FlakySwapDevice {
    pub(crate) fn new(slots: usize, faults: SwapFaults) -> Self {
        FlakySwapDevice {
            inner: RamSwapDevice::new(slots * PAGE / SECTOR_SIZE),
            faults,
        }
    }
}

impl SwapDevice for FlakySwapDevice {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool {
        !self.faults.fail_reads.load(Ordering::SeqCst) && self.inner.read_sector(sector, buf)
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool {
        !self.faults.fail_writes.load(Ordering::SeqCst) && self.inner.write_sector(sector, buf)
    }

    fn sector_count(&self) -> usize {
        self.inner.sector_count()
    }
}

// ============================================================================
// 环境
// ============================================================================

pub(crate) struct Fixture {
    pub vm: VmManager,
    pub alloc: Arc<BitmapPageAllocator>,
    pub swap_faults: SwapFaults,
}

/// `frames` 个物理页、`swap_slots` 个交换槽的虚拟内存管理器
pub(crate) fn fixture(frames: usize, swap_slots: usize) -> Fixture {
    init_test_env();
    let (base, pages) = leak_pages(frames);
    let alloc = Arc::new(unsafe { BitmapPageAllocator::new(base, Ppn(0x8_0000), pages) });
    let swap_faults = SwapFaults::default();
    let device = FlakySwapDevice::new(swap_slots, swap_faults.clone());
    let vm = VmManager::new(alloc.clone(), Box::new(device));
    Fixture {
        vm,
        alloc,
        swap_faults,
    }
}

pub(crate) fn new_space(pid: usize, name: &str) -> Arc<AddressSpace> {
    AddressSpace::new(pid, name, Box::new(MockPageTable::default()))
}

/// 模拟一次用户态访存：页未映射时先触发缺页，
/// 然后在持有页表锁的情况下对整页调用 `f`
pub(crate) fn with_page<R>(
    vm: &VmManager,
    space: &Arc<AddressSpace>,
    addr: Vaddr,
    write: bool,
    sp: Vaddr,
    f: impl FnOnce(&mut [u8]) -> R,
) -> Result<R, FaultError> {
    let page = addr.page_floor();
    let mut cause = FaultCause::USER;
    if write {
        cause |= FaultCause::WRITE;
    }
    for _ in 0..3 {
        {
            let mut pt = space.page_table().lock();
            if let Some(ppn) = pt.translate(page) {
                if write && !pt.is_writable(page) {
                    drop(pt);
                    let fault = PageFault::new(addr, cause | FaultCause::PRESENT, sp);
                    return Err(vm.handle_page_fault(space, &fault).unwrap_err());
                }
                pt.set_accessed(page, true);
                if write {
                    pt.set_dirty(page, true);
                }
                let ptr = vm.frames().allocator().page_ptr(ppn);
                let bytes = unsafe { std::slice::from_raw_parts_mut(ptr, PAGE) };
                return Ok(f(bytes));
            }
        }
        vm.handle_page_fault(space, &PageFault::new(addr, cause, sp))?;
    }
    panic!("{:?} still unmapped after page fault", page);
}

pub(crate) fn user_write(
    vm: &VmManager,
    space: &Arc<AddressSpace>,
    addr: Vaddr,
    data: &[u8],
) -> Result<(), FaultError> {
    let off = addr.page_offset();
    assert!(off + data.len() <= PAGE);
    with_page(vm, space, addr, true, USER_SP, |bytes| {
        bytes[off..off + data.len()].copy_from_slice(data)
    })
}

pub(crate) fn user_read(
    vm: &VmManager,
    space: &Arc<AddressSpace>,
    addr: Vaddr,
    len: usize,
) -> Result<Vec<u8>, FaultError> {
    let off = addr.page_offset();
    assert!(off + len <= PAGE);
    with_page(vm, space, addr, false, USER_SP, |bytes| {
        bytes[off..off + len].to_vec()
    })
}

/// 页当前是否安装在页表中
pub(crate) fn is_mapped(space: &AddressSpace, addr: Vaddr) -> bool {
    space.page_table().lock().translate(addr).is_some()
}

pub(crate) fn set_bits(space: &AddressSpace, addr: Vaddr, accessed: bool, dirty: bool) {
    let mut pt = space.page_table().lock();
    pt.set_accessed(addr, accessed);
    pt.set_dirty(addr, dirty);
}
