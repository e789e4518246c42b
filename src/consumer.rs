//! Consumer: owns discovery + pipeline for one fetch, reassembles segments
//! into an ordered byte stream, and reports periodic statistics.
//!
//! Grounded on `consumer.cpp` (buffered-map reassembly keyed by segment
//! number, contiguous-prefix flush, statistics tick) and on the teacher's
//! `NetStack`/`segment_loop` for the "one task drains ready work every
//! tick" shape.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::info;

use crate::err::Error;
use crate::face::Face;
use crate::pipeline;
use crate::types::{ContentType, Data, Name, SegmentNo};

fn check_application_nack(data: &Data) -> Result<(), Error> {
    if data.content_type == ContentType::Nack {
        Err(Error::ApplicationNack(format!(
            "received application-level Nack for {}",
            data.name
        )))
    } else {
        Ok(())
    }
}

async fn flush_in_order<W: tokio::io::AsyncWrite + Unpin>(
    buffered: &mut BTreeMap<SegmentNo, Data>,
    next_to_print: &mut SegmentNo,
    output: &mut W,
    bytes_written: &mut u64,
) -> Result<(), Error> {
    while let Some(data) = buffered.remove(next_to_print) {
        output.write_all(&data.content).await?;
        *bytes_written += data.content.len() as u64;
        *next_to_print += 1;
    }
    Ok(())
}

fn print_statistics(start: Instant, bytes_written: u64, segments_received: u64) {
    let elapsed = start.elapsed().as_secs_f64().max(1e-6);
    let kbit_per_sec = (bytes_written as f64 * 8.0 / 1000.0) / elapsed;
    info!(
        segments_received,
        bytes_written,
        elapsed_secs = elapsed,
        kbit_per_sec,
        "fetch progress"
    );
}

/// Fetches the full content object named by `prefix`, given the already
/// retrieved seed `Data` (the discovery result), writing segments to
/// `output` in order as they become contiguous.
pub async fn fetch<W: tokio::io::AsyncWrite + Unpin>(
    face: Rc<dyn Face>,
    prefix: Name,
    seed: Data,
    pipeline_options: pipeline::Options,
    print_stat: bool,
    mut output: W,
) -> Result<(), Error> {
    check_application_nack(&seed)?;

    let seed_segment_no = seed.name.last_segment_number().unwrap_or(0);
    let initial_last_segment_no = seed.final_block_id;

    let mut buffered: BTreeMap<SegmentNo, Data> = BTreeMap::new();
    let mut next_to_print: SegmentNo = 0;
    let mut bytes_written: u64 = 0;
    let mut segments_received: u64 = 1;
    buffered.insert(seed_segment_no, seed);

    let (data_tx, mut data_rx) = mpsc::unbounded_channel();
    let params = pipeline::PipelineParams {
        prefix,
        exclude_segment_no: Some(seed_segment_no),
        initial_last_segment_no,
        options: pipeline_options,
    };
    let pipeline_task = tokio::task::spawn_local(pipeline::run(face, params, data_tx));

    let start = Instant::now();
    let mut stat_interval = print_stat.then(|| {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    flush_in_order(&mut buffered, &mut next_to_print, &mut output, &mut bytes_written).await?;

    loop {
        tokio::select! {
            maybe_data = data_rx.recv() => {
                match maybe_data {
                    Some(data) => {
                        if let Err(err) = check_application_nack(&data) {
                            pipeline_task.abort();
                            return Err(err);
                        }
                        segments_received += 1;
                        buffered.insert(data.name.last_segment_number().unwrap_or(0), data);
                        flush_in_order(&mut buffered, &mut next_to_print, &mut output, &mut bytes_written).await?;
                    }
                    None => break,
                }
            }
            _ = async { stat_interval.as_mut().unwrap().tick().await }, if stat_interval.is_some() => {
                print_statistics(start, bytes_written, segments_received);
            }
        }
    }

    match pipeline_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => Err(Error::PipelineFailed(reason)),
        Err(join_err) => Err(Error::PipelineFailed(join_err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{MockFace, Reply};
    use crate::types::{ContentType, Interest};

    fn seed(name: Name, final_block_id: Option<SegmentNo>) -> Data {
        Data {
            name,
            content: b"AAAA".to_vec(),
            final_block_id,
            content_type: ContentType::Blob,
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn reassembles_out_of_order_arrivals() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Interest>();
                let face = Rc::new(MockFace::new(outbound_tx));
                let prefix = Name::parse("/a/v=1");
                let seed_data = seed(prefix.with_segment(0), Some(2));

                let mut output: Vec<u8> = Vec::new();
                let options = pipeline::Options {
                    start_pipeline_size: 2,
                    max_pipeline_size: 2,
                    ..Default::default()
                };

                let face_dyn: Rc<dyn Face> = face.clone();
                let fetch_future =
                    fetch(face_dyn, prefix.clone(), seed_data, options, false, &mut output);

                let driver = async {
                    let mut delivered = 0;
                    while delivered < 2 {
                        let interest = outbound_rx.recv().await.unwrap();
                        let seg = interest.name.last_segment_number().unwrap();
                        // Deliver segment 2 before segment 1 to exercise reordering.
                        let content = if seg == 1 { b"BBBB".to_vec() } else { b"CCCC".to_vec() };
                        face.deliver(
                            &interest.name,
                            Reply::Data(Data {
                                name: interest.name.clone(),
                                content,
                                final_block_id: Some(2),
                                content_type: ContentType::Blob,
                            }),
                        );
                        delivered += 1;
                    }
                };

                let (result, _) = tokio::join!(fetch_future, driver);
                result.unwrap();
                assert_eq!(output, b"AAAABBBBCCCC".to_vec());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn seed_nack_aborts_before_any_interest() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel::<Interest>();
                let face = Rc::new(MockFace::new(outbound_tx));
                let prefix = Name::parse("/a/v=1");
                let nack_seed = Data {
                    name: prefix.with_segment(0),
                    content: vec![],
                    final_block_id: None,
                    content_type: ContentType::Nack,
                };
                let mut output: Vec<u8> = Vec::new();
                let face_dyn: Rc<dyn Face> = face;
                let result = fetch(
                    face_dyn,
                    prefix,
                    nack_seed,
                    pipeline::Options::default(),
                    false,
                    &mut output,
                )
                .await;
                assert!(matches!(result, Err(Error::ApplicationNack(_))));
            })
            .await;
    }
}
