// 上传分片与分片缓冲
//
// B2 上传分片规则：
// - 对象 <= 100MB（1e8 字节）：整体上传，无需分片
// - 对象 > 100MB：按 1e8 字节切分为大文件分片，序号从 1 开始
//
// 缓冲区与 SHA1 摘要同步写入，摘要始终只覆盖尚未封装的字节

use sha1::{Digest, Sha1};
use std::fmt;

/// 单次上传 / 单个分片的大小上限: 1e8 字节
pub const LARGE_FILE_THRESHOLD: usize = 100_000_000;

/// 已封装的上传分片
pub struct UploadChunk {
    /// 分片序号（从 1 开始，重试时保持不变）
    pub id: u32,
    /// 已失败次数
    pub attempt: u32,
    /// 分片大小
    pub size: usize,
    /// 分片 SHA1（十六进制）
    pub sha1: String,
    /// 分片数据
    pub data: Vec<u8>,
}

impl fmt::Debug for UploadChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadChunk")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .field("size", &self.size)
            .field("sha1", &self.sha1)
            .finish_non_exhaustive()
    }
}

/// 分片缓冲区
///
/// 每次追加都同时写入缓冲与摘要，`seal` 时两者一起重置
pub struct ChunkBuffer {
    buf: Vec<u8>,
    hasher: Sha1,
    capacity: usize,
}

impl ChunkBuffer {
    /// 创建缓冲区，容量不超过 `LARGE_FILE_THRESHOLD`
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            hasher: Sha1::new(),
            capacity: capacity.clamp(1, LARGE_FILE_THRESHOLD),
        }
    }

    /// 缓冲容量（即分片大小）
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// 剩余可写字节数
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// 追加数据，最多写到容量上限
    ///
    /// 返回未能写入的剩余部分；剩余部分非空说明缓冲已满，需要先封装分片
    pub fn fill<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        let take = data.len().min(self.remaining());
        let (head, rest) = data.split_at(take);
        if !head.is_empty() {
            self.hasher.update(head);
            self.buf.extend_from_slice(head);
        }
        rest
    }

    /// 当前缓冲内容的 SHA1（不重置）
    pub fn sha1_hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// 当前缓冲内容
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// 封装为分片，并重置缓冲与摘要
    pub fn seal(&mut self, id: u32) -> UploadChunk {
        let data = std::mem::take(&mut self.buf);
        let sha1 = hex::encode(std::mem::replace(&mut self.hasher, Sha1::new()).finalize());
        UploadChunk {
            id,
            attempt: 0,
            size: data.len(),
            sha1,
            data,
        }
    }
}

impl fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sha1_of(data: &[u8]) -> String {
        hex::encode(Sha1::digest(data))
    }

    /// 按写入器的方式驱动缓冲区，返回封装出的分片与最终残留
    fn split(capacity: usize, writes: &[Vec<u8>]) -> (Vec<UploadChunk>, ChunkBuffer) {
        let mut buffer = ChunkBuffer::new(capacity);
        let mut chunks = Vec::new();
        for write in writes {
            let mut rest = write.as_slice();
            loop {
                rest = buffer.fill(rest);
                if rest.is_empty() {
                    break;
                }
                chunks.push(buffer.seal(chunks.len() as u32 + 1));
            }
        }
        (chunks, buffer)
    }

    #[test]
    fn test_fill_stops_at_capacity() {
        let mut buffer = ChunkBuffer::new(10);
        let rest = buffer.fill(b"0123456789abc");
        assert_eq!(rest, b"abc");
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.remaining(), 0);

        // 缓冲已满时不再接收
        let rest = buffer.fill(b"xyz");
        assert_eq!(rest, b"xyz");
    }

    #[test]
    fn test_exact_capacity_does_not_overflow() {
        let (chunks, buffer) = split(10, &[vec![7u8; 10]]);
        assert!(chunks.is_empty());
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn test_seal_resets_digest() {
        let mut buffer = ChunkBuffer::new(8);
        buffer.fill(b"abcdefgh");
        assert_eq!(buffer.sha1_hex(), sha1_of(b"abcdefgh"));

        let chunk = buffer.seal(1);
        assert_eq!(chunk.id, 1);
        assert_eq!(chunk.attempt, 0);
        assert_eq!(chunk.size, 8);
        assert_eq!(chunk.sha1, sha1_of(b"abcdefgh"));
        assert!(buffer.is_empty());
        assert_eq!(buffer.sha1_hex(), sha1_of(b""));

        buffer.fill(b"xy");
        assert_eq!(buffer.sha1_hex(), sha1_of(b"xy"));
    }

    #[test]
    fn test_capacity_is_clamped() {
        assert_eq!(ChunkBuffer::new(0).capacity(), 1);
        assert_eq!(
            ChunkBuffer::new(LARGE_FILE_THRESHOLD * 2).capacity(),
            LARGE_FILE_THRESHOLD
        );
    }

    #[test]
    fn test_large_single_write_splits_iteratively() {
        // 一次写入 25 个分片的数据
        let (chunks, buffer) = split(4, &[vec![1u8; 101]]);
        assert_eq!(chunks.len(), 25);
        assert!(chunks.iter().all(|c| c.size == 4));
        assert_eq!(buffer.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_input(
            capacity in 1usize..64,
            writes in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 0..12),
        ) {
            let (chunks, buffer) = split(capacity, &writes);
            let input: Vec<u8> = writes.concat();

            // 除残留外每个分片都是满的，且摘要与内容一致
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.id as usize, i + 1);
                prop_assert_eq!(chunk.size, capacity);
                prop_assert_eq!(&chunk.sha1, &sha1_of(&chunk.data));
            }
            prop_assert!(buffer.len() <= capacity);
            prop_assert_eq!(buffer.sha1_hex(), sha1_of(buffer.as_slice()));

            let mut joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
            joined.extend_from_slice(buffer.as_slice());
            prop_assert_eq!(joined, input.clone());

            // 溢出时才封装：残留为空只可能是没有任何输入
            if input.len() > capacity {
                prop_assert!(!buffer.is_empty());
                prop_assert_eq!(chunks.len(), (input.len() - 1) / capacity);
            } else {
                prop_assert!(chunks.is_empty());
            }
        }
    }
}
