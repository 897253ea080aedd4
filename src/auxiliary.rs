//! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール

use std::num::NonZeroU32;

use crate::{
    Either, Error, Result,
    boxes::{StblBox, StszBox},
};

// stsc のエントリーを、チャンクの範囲から先頭サンプルの通し番号に引き直したもの
#[derive(Debug)]
struct SampleChunkRun {
    first_sample: u32, // 0 始まり
    first_chunk: u32,  // 1 始まり
    sample_per_chunk: u32,
    sample_description_index: NonZeroU32,
}

/// [`StblBox`] をラップして、その中の情報を簡単かつ効率的に取り出せるようにするための構造体
#[derive(Debug)]
pub struct SampleTableAccessor<'a> {
    stbl_box: &'a StblBox,
    sample_count: u32,
    stts_table: Vec<(u32, u64, u32)>, // (累計サンプル数、累計尺、尺）
    ctts_table: Vec<(u32, i64)>,      // (累計サンプル数、合成時刻オフセット）
    chunk_table: Vec<SampleChunkRun>,
}

impl<'a> SampleTableAccessor<'a> {
    /// 引数で渡された [`StblBox`] 用の [`SampleTableAccessor`] インスタンスを生成する
    ///
    /// [`StblBox`] 内の各テーブルに不整合がある場合にはエラーが返される
    pub fn new(stbl_box: &'a StblBox) -> Result<Self> {
        let mut stts_table = Vec::new();
        let mut sample_count = 0;
        let mut total_duration = 0;
        for entry in &stbl_box.stts_box.entries {
            stts_table.push((sample_count, total_duration, entry.sample_delta));
            sample_count += entry.sample_count;
            total_duration += entry.sample_count as u64 * entry.sample_delta as u64;
        }

        if let StszBox::Variable { entry_sizes } = &stbl_box.stsz_box
            && entry_sizes.len() != sample_count as usize
        {
            return Err(Error::invalid_data(format!(
                "Inconsistent sample count: stts={sample_count}, stsz={}",
                entry_sizes.len()
            )));
        }

        let mut ctts_table = Vec::new();
        if let Some(ctts_box) = &stbl_box.ctts_box {
            let mut offset_sample_count = 0;
            for entry in &ctts_box.entries {
                ctts_table.push((offset_sample_count, entry.sample_offset));
                offset_sample_count += entry.sample_count;
            }
        }

        let chunk_count = match &stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.len() as u32,
            Either::B(b) => b.chunk_offsets.len() as u32,
        };

        let mut chunk_table = Vec::with_capacity(stbl_box.stsc_box.entries.len());
        let mut first_sample = 0;
        for (i, entry) in stbl_box.stsc_box.entries.iter().enumerate() {
            if entry.sample_per_chunk == 0 {
                return Err(Error::invalid_data(
                    "Invalid `sample_per_chunk` value in `stsc` box: 0",
                ));
            }

            let next_first_chunk = stbl_box
                .stsc_box
                .entries
                .get(i + 1)
                .map(|next| next.first_chunk.get())
                .unwrap_or(chunk_count + 1);
            if next_first_chunk < entry.first_chunk.get() {
                return Err(Error::invalid_data(
                    "`first_chunk` values in `stsc` box are not sorted",
                ));
            }

            chunk_table.push(SampleChunkRun {
                first_sample,
                first_chunk: entry.first_chunk.get(),
                sample_per_chunk: entry.sample_per_chunk,
                sample_description_index: entry.sample_description_index,
            });

            let chunks_in_run = next_first_chunk - entry.first_chunk.get();
            first_sample += chunks_in_run * entry.sample_per_chunk;
        }

        Ok(Self {
            stbl_box,
            sample_count,
            stts_table,
            ctts_table,
            chunk_table,
        })
    }

    /// トラック内のサンプルの数を取得する
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// トラック内のチャンクの数を取得する
    pub fn chunk_count(&self) -> u32 {
        match &self.stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.len() as u32,
            Either::B(b) => b.chunk_offsets.len() as u32,
        }
    }

    /// トラックの合計尺を取得する
    pub fn total_duration(&self) -> u64 {
        self.stbl_box
            .stts_box
            .entries
            .iter()
            .map(|e| e.sample_count as u64 * e.sample_delta as u64)
            .sum()
    }

    /// 指定されたサンプルの尺を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_duration(&self, sample_index: NonZeroU32) -> Option<u32> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let i = match self
            .stts_table
            .binary_search_by_key(&(sample_index.get() - 1), |x| x.0)
        {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        self.stts_table.get(i).map(|x| x.2)
    }

    /// 指定されたサンプルのデコード時刻（トラック先頭からの経過時間）を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_timestamp(&self, sample_index: NonZeroU32) -> Option<u64> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let i = match self
            .stts_table
            .binary_search_by_key(&(sample_index.get() - 1), |x| x.0)
        {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let (first_sample, base_timestamp, delta) = self.stts_table[i];
        Some(base_timestamp + (sample_index.get() - 1 - first_sample) as u64 * delta as u64)
    }

    /// 指定されたサンプルの合成時刻オフセット（デコード時刻との差分）を取得する
    ///
    /// ctts ボックスが存在しない場合は常に 0 となる。
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_composition_offset(&self, sample_index: NonZeroU32) -> Option<i64> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        if self.ctts_table.is_empty() {
            return Some(0);
        }

        let i = match self
            .ctts_table
            .binary_search_by_key(&(sample_index.get() - 1), |x| x.0)
        {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        self.ctts_table.get(i).map(|x| x.1)
    }

    /// 指定されたサンプルのデータサイズ（バイト数）を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_size(&self, sample_index: NonZeroU32) -> Option<u32> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let i = sample_index.get() as usize - 1;
        match &self.stbl_box.stsz_box {
            StszBox::Fixed { sample_size, .. } => Some(sample_size.get()),
            StszBox::Variable { entry_sizes } => entry_sizes.get(i).copied(),
        }
    }

    /// 指定されたサンプルが同期サンプルかどうかを判定する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn is_sync_sample(&self, sample_index: NonZeroU32) -> Option<bool> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let Some(stss_box) = &self.stbl_box.stss_box else {
            // stss ボックスが存在しない場合は全てが同期サンプル扱い
            return Some(true);
        };

        Some(stss_box.sample_numbers.binary_search(&sample_index).is_ok())
    }

    /// 指定されたチャンクのファイル内でのバイト位置を返す
    ///
    /// 存在しないチャンクが指定された場合には [`None`] が返される
    pub fn chunk_offset(&self, chunk_index: NonZeroU32) -> Option<u64> {
        let i = chunk_index.get() as usize - 1;
        match &self.stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.get(i).copied().map(|v| v as u64),
            Either::B(b) => b.chunk_offsets.get(i).copied(),
        }
    }

    /// 指定されたサンプルが属するチャンクの番号（1 始まり）を返す
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_chunk_index(&self, sample_index: NonZeroU32) -> Option<NonZeroU32> {
        let (run, index_in_run) = self.sample_chunk_run(sample_index)?;
        let chunk = run.first_chunk + index_in_run / run.sample_per_chunk;
        NonZeroU32::new(chunk)
    }

    /// 指定されたサンプルのサンプルエントリーの番号（1 始まり）を返す
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_description_index(&self, sample_index: NonZeroU32) -> Option<NonZeroU32> {
        let (run, _) = self.sample_chunk_run(sample_index)?;
        Some(run.sample_description_index)
    }

    /// 指定されたサンプルのデータのファイル内でのバイト位置を返す
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_file_offset(&self, sample_index: NonZeroU32) -> Option<u64> {
        let (run, index_in_run) = self.sample_chunk_run(sample_index)?;
        let chunk = run.first_chunk + index_in_run / run.sample_per_chunk;
        let index_in_chunk = index_in_run % run.sample_per_chunk;

        let mut offset = self.chunk_offset(NonZeroU32::new(chunk)?)?;

        // 同一チャンク内の先行サンプルのサイズ分を加算する
        let chunk_first_sample = sample_index.get() - index_in_chunk;
        for i in chunk_first_sample..sample_index.get() {
            offset += self.sample_size(NonZeroU32::new(i)?)? as u64;
        }

        Some(offset)
    }

    fn sample_chunk_run(&self, sample_index: NonZeroU32) -> Option<(&SampleChunkRun, u32)> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let i = match self
            .chunk_table
            .binary_search_by_key(&(sample_index.get() - 1), |run| run.first_sample)
        {
            Ok(i) => i,
            Err(i) => i.checked_sub(1)?,
        };
        let run = self.chunk_table.get(i)?;
        Some((run, sample_index.get() - 1 - run.first_sample))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use crate::boxes::{
        Co64Box, CttsBox, StblBox, StcoBox, StscBox, StsdBox, StssBox, StszBox, SttsBox, SttsEntry,
    };

    use super::*;

    fn stbl(stco_or_co64: Either<StcoBox, Co64Box>) -> StblBox {
        StblBox {
            stsd_box: StsdBox {
                entries: Vec::new(),
            },
            stts_box: SttsBox {
                entries: vec![
                    SttsEntry {
                        sample_count: 2,
                        sample_delta: 100,
                    },
                    SttsEntry {
                        sample_count: 3,
                        sample_delta: 40,
                    },
                ],
            },
            ctts_box: Some(CttsBox::from_sample_offsets([0, 80, -40, 0, 0].into_iter())),
            stsc_box: StscBox::from_sample_per_chunk_counts([2, 2, 1].iter().copied()),
            stsz_box: StszBox::Variable {
                entry_sizes: vec![10, 20, 30, 40, 50],
            },
            stco_or_co64_box: stco_or_co64,
            stss_box: Some(StssBox {
                sample_numbers: vec![NonZeroU32::MIN, NonZeroU32::MIN.saturating_add(2)],
            }),
            sdtp_box: None,
            unknown_boxes: Vec::new(),
        }
    }

    fn index(i: u32) -> NonZeroU32 {
        NonZeroU32::new(i).unwrap()
    }

    #[test]
    fn sample_table_basics() {
        let stbl_box = stbl(Either::A(StcoBox {
            chunk_offsets: vec![1000, 2000, 3000],
        }));
        let table = SampleTableAccessor::new(&stbl_box).unwrap();

        assert_eq!(table.sample_count(), 5);
        assert_eq!(table.chunk_count(), 3);
        assert_eq!(table.total_duration(), 2 * 100 + 3 * 40);

        assert_eq!(table.sample_duration(index(1)), Some(100));
        assert_eq!(table.sample_duration(index(2)), Some(100));
        assert_eq!(table.sample_duration(index(3)), Some(40));
        assert_eq!(table.sample_duration(index(5)), Some(40));
        assert_eq!(table.sample_duration(index(6)), None);

        assert_eq!(table.sample_timestamp(index(1)), Some(0));
        assert_eq!(table.sample_timestamp(index(2)), Some(100));
        assert_eq!(table.sample_timestamp(index(3)), Some(200));
        assert_eq!(table.sample_timestamp(index(5)), Some(280));

        assert_eq!(table.sample_composition_offset(index(1)), Some(0));
        assert_eq!(table.sample_composition_offset(index(2)), Some(80));
        assert_eq!(table.sample_composition_offset(index(3)), Some(-40));
        assert_eq!(table.sample_composition_offset(index(4)), Some(0));

        assert_eq!(table.sample_size(index(1)), Some(10));
        assert_eq!(table.sample_size(index(5)), Some(50));

        assert_eq!(table.is_sync_sample(index(1)), Some(true));
        assert_eq!(table.is_sync_sample(index(2)), Some(false));
        assert_eq!(table.is_sync_sample(index(3)), Some(true));
    }

    #[test]
    fn sample_chunk_resolution() {
        let stbl_box = stbl(Either::A(StcoBox {
            chunk_offsets: vec![1000, 2000, 3000],
        }));
        let table = SampleTableAccessor::new(&stbl_box).unwrap();

        assert_eq!(table.sample_chunk_index(index(1)), Some(index(1)));
        assert_eq!(table.sample_chunk_index(index(2)), Some(index(1)));
        assert_eq!(table.sample_chunk_index(index(3)), Some(index(2)));
        assert_eq!(table.sample_chunk_index(index(4)), Some(index(2)));
        assert_eq!(table.sample_chunk_index(index(5)), Some(index(3)));
        assert_eq!(table.sample_chunk_index(index(6)), None);

        assert_eq!(table.sample_file_offset(index(1)), Some(1000));
        assert_eq!(table.sample_file_offset(index(2)), Some(1010));
        assert_eq!(table.sample_file_offset(index(3)), Some(2000));
        assert_eq!(table.sample_file_offset(index(4)), Some(2030));
        assert_eq!(table.sample_file_offset(index(5)), Some(3000));
    }

    #[test]
    fn sixty_four_bit_chunk_offsets() {
        let stbl_box = stbl(Either::B(Co64Box {
            chunk_offsets: vec![u32::MAX as u64 + 1, u32::MAX as u64 + 1000, 5_000_000_000],
        }));
        let table = SampleTableAccessor::new(&stbl_box).unwrap();

        assert_eq!(table.chunk_offset(index(1)), Some(u32::MAX as u64 + 1));
        assert_eq!(table.sample_file_offset(index(5)), Some(5_000_000_000));
    }

    #[test]
    fn inconsistent_sample_count_is_rejected() {
        let mut stbl_box = stbl(Either::A(StcoBox {
            chunk_offsets: vec![1000, 2000, 3000],
        }));
        stbl_box.stsz_box = StszBox::Variable {
            entry_sizes: vec![10, 20],
        };
        assert!(SampleTableAccessor::new(&stbl_box).is_err());
    }
}
