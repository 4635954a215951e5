//! 固定容量的字节区域。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 反应器节点的入站/出站缓冲、TLS 节点的明文累积区都需要“容量固定、可追加、可从头部消费”的字节区，
//!   对应原型中 position/limit 语义的 NIO 缓冲；
//! - 存储在构造时一次性清零分配，此后读写只移动 `head`/`tail` 两个游标，
//!   `read_from` 直接把空闲尾部交给 `Read::read`，不再逐次填零。
//!
//! ## 契约（What）
//! - 任何写入都不会超过构造时声明的 `capacity`，超出部分由调用方保留；
//! - `consume`/`split_to` 从头部移除数据，剩余字节保持原有顺序；
//! - 追加前若尾部空间不足而头部有已消费的空洞，则把未消费字节搬回起点（compact）；
//! - 作为 `io::Write` 使用时，区域写满后返回 `Ok(0)`，不会扩容。

use std::fmt;
use std::io::{self, Read, Write};

use bytes::Bytes;

/// 固定容量字节区域。
pub struct ByteRegion {
    storage: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl fmt::Debug for ByteRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteRegion")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl ByteRegion {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// 已填充、尚未消费的字节数。
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// 还能追加的字节数。
    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn has_room(&self) -> bool {
        self.remaining_capacity() > 0
    }

    pub fn is_full(&self) -> bool {
        !self.has_room()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.head..self.tail]
    }

    /// 尽可能多地追加 `data`，返回实际追加的字节数。
    pub fn put_slice(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining_capacity());
        if take == 0 {
            return 0;
        }
        let spare = self.spare_mut();
        spare[..take].copy_from_slice(&data[..take]);
        self.tail += take;
        take
    }

    /// 从头部丢弃 `count` 个字节。
    ///
    /// # Panics
    /// `count` 超过 [`Self::len`] 时 panic，与 `Buf::advance` 一致。
    pub fn consume(&mut self, count: usize) {
        assert!(
            count <= self.len(),
            "cannot consume {count} bytes from a region holding {}",
            self.len()
        );
        self.head += count;
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// 从头部切出 `count` 个字节，复制为只读视图。
    pub fn split_to(&mut self, count: usize) -> Bytes {
        assert!(
            count <= self.len(),
            "cannot split {count} bytes from a region holding {}",
            self.len()
        );
        let chunk = Bytes::copy_from_slice(&self.storage[self.head..self.head + count]);
        self.consume(count);
        chunk
    }

    /// 取走全部已填充字节。
    pub fn take_all(&mut self) -> Bytes {
        self.split_to(self.len())
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// 从 `reader` 读取一次，最多填满剩余容量。
    ///
    /// 返回 `Ok(0)` 既可能表示对端已关闭，也可能表示区域已满；调用方应先检查 [`Self::has_room`]。
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.is_full() {
            return Ok(0);
        }
        let read = reader.read(self.spare_mut())?;
        self.tail += read;
        Ok(read)
    }

    /// 向 `writer` 写出一次，并从头部消费已写出的字节。
    pub fn write_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let written = writer.write(self.as_slice())?;
        self.consume(written);
        Ok(written)
    }

    /// 尾部全部空闲空间；头部有空洞时先 compact。
    fn spare_mut(&mut self) -> &mut [u8] {
        if self.head > 0 {
            self.storage.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }
        &mut self.storage[self.tail..]
    }
}

impl Write for ByteRegion {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        Ok(self.put_slice(data))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_slice_stops_at_capacity() {
        let mut region = ByteRegion::with_capacity(4);
        assert_eq!(region.put_slice(b"abcdef"), 4);
        assert!(region.is_full());
        assert_eq!(region.as_slice(), b"abcd");
        assert_eq!(region.put_slice(b"x"), 0);
    }

    #[test]
    fn consume_frees_room_and_keeps_order() {
        let mut region = ByteRegion::with_capacity(6);
        region.put_slice(b"hello!");
        region.consume(2);
        assert_eq!(region.as_slice(), b"llo!");
        assert_eq!(region.remaining_capacity(), 2);
        region.put_slice(b"??");
        assert_eq!(region.as_slice(), b"llo!??");
    }

    #[test]
    fn read_from_respects_capacity_and_truncates() {
        let mut region = ByteRegion::with_capacity(3);
        let mut source: &[u8] = b"12345";
        assert_eq!(region.read_from(&mut source).expect("读取内存源"), 3);
        assert_eq!(region.as_slice(), b"123");
        assert_eq!(region.read_from(&mut source).expect("区域已满"), 0);

        region.clear();
        let mut empty: &[u8] = b"";
        assert_eq!(region.read_from(&mut empty).expect("空源"), 0);
        assert!(region.is_empty());
    }

    #[test]
    fn read_after_partial_consume_offers_all_free_room() {
        let mut region = ByteRegion::with_capacity(6);
        region.put_slice(b"abcd");
        region.consume(3);

        let mut source: &[u8] = b"xyz12345";
        assert_eq!(region.read_from(&mut source).expect("读取内存源"), 5);
        assert_eq!(region.as_slice(), b"dxyz12");
        assert!(region.is_full());

        assert_eq!(region.split_to(2).as_ref(), b"dx");
        assert_eq!(region.take_all().as_ref(), b"yz12");
        assert!(region.is_empty());
        assert_eq!(region.remaining_capacity(), 6);
    }

    #[test]
    fn failed_read_leaves_contents_untouched() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                buf.fill(b'!');
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
        }

        let mut region = ByteRegion::with_capacity(4);
        region.put_slice(b"ok");
        let err = region.read_from(&mut Broken).expect_err("读取应失败");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(region.as_slice(), b"ok");
        assert_eq!(region.remaining_capacity(), 2);
    }

    #[test]
    fn write_to_consumes_written_prefix() {
        let mut region = ByteRegion::with_capacity(8);
        region.put_slice(b"payload");
        let mut sink = Vec::new();
        assert_eq!(region.write_to(&mut sink).expect("写入 Vec"), 7);
        assert!(region.is_empty());
        assert_eq!(sink, b"payload");
    }
}
