use scatnet::device::DeviceSet;
use scatnet::scattering::ReplicatedScattering;
use scatnet::tensor::Tensor;

fn batch_of(len: usize) -> Tensor<f32, 4> {
    let data: Vec<f32> = (0..len * 2 * 4 * 4).map(|i| (i % 97) as f32 * 0.5).collect();
    Tensor::new(data, [len, 2, 4, 4]).unwrap()
}

#[test]
fn test_shard_counts_and_sizes() {
    for batch_len in [1usize, 2, 3, 5, 8, 16] {
        for devices in [1usize, 2, 3, 4] {
            if devices > batch_len {
                continue;
            }
            let scat = ReplicatedScattering::new(1, DeviceSet::new(devices).unwrap());
            let results = scat.apply(&batch_of(batch_len)).unwrap();

            let shard_size = batch_len.div_ceil(devices);
            let expected = devices.min(batch_len.div_ceil(shard_size));
            assert_eq!(
                results.len(),
                expected,
                "batch {batch_len} over {devices} devices"
            );

            let total: usize = results.iter().map(|r| r.batch_len()).sum();
            assert_eq!(total, batch_len);
        }
    }
}

#[test]
fn test_positional_correspondence_across_calls() {
    let scat = ReplicatedScattering::new(1, DeviceSet::new(3).unwrap());
    let batch = batch_of(7);

    let first = scat.apply(&batch).unwrap();
    for _ in 0..5 {
        let again = scat.apply(&batch).unwrap();
        let order: Vec<usize> = again.iter().map(|r| r.device().0).collect();
        assert_eq!(order, vec![0, 1, 2]);

        // Same shard -> same device -> identical features, every time.
        for (a, b) in first.iter().zip(&again) {
            assert_eq!(a.batch_len(), b.batch_len());
            assert_eq!(a.features(), b.features());
        }
    }
}

#[test]
fn test_results_stay_sharded() {
    // No implicit gather: each result covers only its own shard's rows.
    let scat = ReplicatedScattering::new(0, DeviceSet::new(2).unwrap());
    let batch = batch_of(4);
    let results = scat.apply(&batch).unwrap();

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.features()[0].shape()[0], result.batch_len());
    }

    // Order 0 is the identity, so shard 1's features are rows 2..4 of the
    // input - not the whole batch.
    let row = 2 * 4 * 4;
    assert_eq!(results[1].features()[0].data(), &batch.data()[2 * row..]);
}

#[test]
fn test_more_devices_than_examples() {
    let scat = ReplicatedScattering::new(0, DeviceSet::new(8).unwrap());
    let results = scat.apply(&batch_of(3)).unwrap();

    // ceil(3/8) = 1 per shard; five devices sit this batch out.
    assert_eq!(results.len(), 3);
    let order: Vec<usize> = results.iter().map(|r| r.device().0).collect();
    assert_eq!(order, vec![0, 1, 2]);
}
