//! End-to-end scenarios driven entirely in-process over `MockFace`: no real
//! socket is ever opened, matching the "ambient, end-to-end" scenarios in
//! the testable-properties list (fixed discovery into a full pipeline run,
//! and a usage error rejected before any transport is built).

use std::rc::Rc;

use catchunks::cli::{Cli, DiscoverMode};
use catchunks::discover::{self, DiscoverOptions};
use catchunks::err::Error;
use catchunks::face::{Face, MockFace, Reply};
use catchunks::types::{ContentType, Data, Name};
use catchunks::consumer;
use clap::Parser;
use tokio::sync::mpsc;

fn segment(name: Name, content: &[u8], final_block_id: Option<u64>) -> Data {
    Data {
        name,
        content: content.to_vec(),
        final_block_id,
        content_type: ContentType::Blob,
    }
}

/// S7 — fixed discovery against an already-versioned name, then a full
/// pipeline run over a 5-segment object, reassembled in order.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn fixed_discovery_then_full_pipeline_fetch() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let args = vec![
                "catchunks".to_string(),
                "--host".to_string(),
                "127.0.0.1:6363".to_string(),
                "-d".to_string(),
                "fixed".to_string(),
                "-k".to_string(),
                "-p".to_string(),
                "2".to_string(),
                "/test/v=1".to_string(),
            ];
            let cli = Cli::try_parse_from(args).unwrap();
            let resolved = cli.resolve().unwrap();
            assert_eq!(resolved.discover_mode, DiscoverMode::Fixed);

            const N_SEGMENTS: u64 = 5;
            let contents: Vec<Vec<u8>> = (0..N_SEGMENTS)
                .map(|seg| vec![b'A' + seg as u8; 4])
                .collect();

            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
            let face = Rc::new(MockFace::new(outbound_tx));
            let face_dyn: Rc<dyn Face> = face.clone();

            let producer = {
                let face = face.clone();
                let contents = contents.clone();
                async move {
                    let mut served = 0u64;
                    while served < N_SEGMENTS {
                        let interest = outbound_rx.recv().await.unwrap();
                        let seg = interest.name.last_segment_number().unwrap();
                        face.deliver(
                            &interest.name,
                            Reply::Data(segment(
                                interest.name.clone(),
                                &contents[seg as usize],
                                Some(N_SEGMENTS - 1),
                            )),
                        );
                        served += 1;
                    }
                }
            };

            let fetch = async {
                let seed = discover::fixed(&*face_dyn, resolved.name.clone(), &DiscoverOptions::default())
                    .await
                    .unwrap();
                assert_eq!(seed.content, contents[0]);

                let versioned_prefix = seed.name.without_last();
                let mut output: Vec<u8> = Vec::new();
                consumer::fetch(
                    face_dyn.clone(),
                    versioned_prefix,
                    seed,
                    resolved.pipeline_options.clone(),
                    false,
                    &mut output,
                )
                .await
                .unwrap();
                output
            };

            let (output, ()) = tokio::join!(fetch, producer);
            let expected: Vec<u8> = contents.concat();
            assert_eq!(output, expected);
        })
        .await;
}

/// S8 — usage error: `-d fixed` with a name lacking a version component is
/// rejected by `Cli::resolve` before any `Face` is constructed.
#[test]
fn usage_error_rejected_before_any_transport() {
    let args = vec![
        "catchunks".to_string(),
        "--host".to_string(),
        "127.0.0.1:6363".to_string(),
        "-d".to_string(),
        "fixed".to_string(),
        "-k".to_string(),
        "/test".to_string(),
    ];
    let cli = Cli::try_parse_from(args).unwrap();
    match cli.resolve() {
        Err(Error::Usage(msg)) => assert!(msg.contains("version")),
        Ok(_) => panic!("expected a usage error, got Ok"),
        Err(err) => panic!("expected a usage error, got {err}"),
    }
}
