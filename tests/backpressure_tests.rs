//! Integration tests for input backpressure and ordering under load.

use millrace::graph::PipelineBuilder;
use millrace::item::DataItem;
use millrace::stream::{PipelineConfig, StreamingPipeline};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn int(item: &DataItem) -> i64 {
    *item.downcast_ref::<i64>().expect("i64 payload")
}

fn slow_pipeline(config: PipelineConfig, task_delay: Duration) -> Arc<StreamingPipeline> {
    let pipeline = StreamingPipeline::new(config).unwrap();
    pipeline
        .set_processor(
            move |builder: &mut PipelineBuilder, item: DataItem, output_id: &str| {
                let input = builder.add_input("in", item)?;
                builder.add_task(
                    output_id,
                    move |inputs: &[DataItem]| {
                        std::thread::sleep(task_delay);
                        Ok(inputs[0].clone())
                    },
                    &[input],
                )?;
                Ok(())
            },
        )
        .unwrap();
    pipeline
}

/// With a cap of 2 and a 50 ms task, later pushes must block until the
/// driver makes room; nothing is dropped and the cap is never exceeded.
#[test]
fn test_add_input_blocks_at_capacity() {
    let pipeline = slow_pipeline(PipelineConfig::new(1, 2), Duration::from_millis(50));
    pipeline.start().unwrap();

    let mut push_times = Vec::new();
    for value in 0..5i64 {
        let start = Instant::now();
        assert!(pipeline.add_input(DataItem::new(value)));
        push_times.push(start.elapsed());
        assert!(pipeline.input_size() <= 2, "input cap exceeded");
    }

    // The first two pushes find room immediately.
    assert!(push_times[0] < Duration::from_millis(20));
    assert!(push_times[1] < Duration::from_millis(20));
    // Once the queue is full behind a 50 ms item, pushes wait for the
    // driver to pop before they can proceed.
    assert!(
        push_times[3] >= Duration::from_millis(35),
        "push 4 returned after {:?}",
        push_times[3]
    );
    assert!(
        push_times[4] >= Duration::from_millis(35),
        "push 5 returned after {:?}",
        push_times[4]
    );

    // No push was dropped: all five outputs appear, in order.
    let outputs: Vec<i64> = (0..5)
        .map(|_| int(&pipeline.get_output().unwrap()))
        .collect();
    assert_eq!(outputs, vec![0, 1, 2, 3, 4]);

    pipeline.stop();
    assert_eq!(pipeline.processed_items(), 5);
    assert_eq!(pipeline.error_count(), 0);
}

/// A push that is blocked on a full queue returns `false` once the
/// input side closes instead of pushing late.
#[test]
fn test_blocked_push_observes_input_close() {
    let pipeline = slow_pipeline(PipelineConfig::new(1, 1), Duration::from_millis(50));
    pipeline.start().unwrap();

    assert!(pipeline.add_input(DataItem::new(0i64)));
    assert!(pipeline.add_input(DataItem::new(1i64)));

    let blocked = std::thread::spawn({
        let pipeline = pipeline.clone();
        move || pipeline.add_input(DataItem::new(2i64))
    });
    std::thread::sleep(Duration::from_millis(15));
    pipeline.close_input();

    assert!(!blocked.join().unwrap());
    pipeline.stop();
}

/// Output order equals input order even when per-item latency varies.
#[test]
fn test_items_keep_arrival_order_under_variable_latency() {
    let pipeline = StreamingPipeline::new(PipelineConfig::new(4, 100)).unwrap();
    pipeline
        .set_processor(
            |builder: &mut PipelineBuilder, item: DataItem, output_id: &str| {
                let input = builder.add_input("in", item)?;
                builder.add_task(
                    output_id,
                    |inputs: &[DataItem]| {
                        let value = int(&inputs[0]);
                        std::thread::sleep(Duration::from_millis((value % 3) as u64));
                        Ok(DataItem::new(value))
                    },
                    &[input],
                )?;
                Ok(())
            },
        )
        .unwrap();

    pipeline.start().unwrap();
    for value in 0..50i64 {
        assert!(pipeline.add_input(DataItem::new(value)));
    }

    let outputs: Vec<i64> = (0..50)
        .map(|_| int(&pipeline.get_output().unwrap()))
        .collect();
    assert_eq!(outputs, (0..50).collect::<Vec<_>>());

    pipeline.stop();
    assert_eq!(pipeline.processed_items(), 50);
}
