// Descriptor loading and GPU → job attribution against in-memory collaborators

mod common;

use common::{Cluster, descriptor, device};
use gpustats::collector::{collect_samples, load_job_descriptors};

#[tokio::test]
async fn multi_node_jobs_are_excluded() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("1", descriptor(2, 1));
    cluster.scheduler.add_job("2", descriptor(4, 2));
    cluster.scheduler.add_job("3", descriptor(0, 1));

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let ids: Vec<&str> = descriptors.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["1", "3"]);
    assert_eq!(descriptors["1"], descriptor(2, 1));
}

#[tokio::test]
async fn job_with_failing_descriptor_query_is_skipped() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("1", descriptor(1, 1));
    cluster.scheduler.add_vanishing_job("2");

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    assert_eq!(descriptors.len(), 1);
    assert!(descriptors.contains_key("1"));
}

#[tokio::test]
async fn scheduler_unreachable_is_an_error() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("1", descriptor(1, 1));
    cluster.scheduler.set_down(true);

    let err = load_job_descriptors(cluster.scheduler.as_ref())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("listing active jobs"));
}

#[tokio::test]
async fn utilization_is_normalized_by_requested_gpus() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("42", descriptor(2, 1));
    cluster.resolver.assign(100, "42");
    cluster.resolver.assign(101, "42");
    cluster.gpus.set_devices(vec![
        device(0, 50.0, 100.0, &[(100, 1000.0)]),
        device(1, 50.0, 120.0, &[(101, 1000.0)]),
    ]);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let samples = collect_samples(
        &descriptors,
        cluster.gpus.as_ref(),
        cluster.resolver.as_ref(),
    )
    .await
    .unwrap();

    let s = &samples["42"];
    assert_eq!(s.gpu_util, 50.0);
    assert_eq!(s.gpu_power, 220.0);
    assert_eq!(s.gpu_mem_max, 1000.0);
    assert_eq!(s.ngpu, 2);
    assert_eq!(s.ncpu, 4);
}

#[tokio::test]
async fn job_using_fewer_gpus_than_requested_reads_low() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("5", descriptor(4, 1));
    cluster.resolver.assign(10, "5");
    cluster
        .gpus
        .set_devices(vec![device(0, 80.0, 250.0, &[(10, 4000.0)])]);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let samples = collect_samples(&descriptors, cluster.gpus.as_ref(), cluster.resolver.as_ref())
        .await
        .unwrap();
    assert_eq!(samples["5"].gpu_util, 20.0);
}

#[tokio::test]
async fn zero_gpu_jobs_get_no_sample() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("8", descriptor(0, 1));
    cluster.resolver.assign(10, "8");
    cluster
        .gpus
        .set_devices(vec![device(0, 30.0, 90.0, &[(10, 300.0)])]);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let samples = collect_samples(&descriptors, cluster.gpus.as_ref(), cluster.resolver.as_ref())
        .await
        .unwrap();
    assert!(samples.is_empty());
}

#[tokio::test]
async fn idle_requested_job_gets_zero_sample() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("9", descriptor(1, 1));
    cluster.gpus.set_devices(vec![device(0, 0.0, 40.0, &[])]);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let samples = collect_samples(&descriptors, cluster.gpus.as_ref(), cluster.resolver.as_ref())
        .await
        .unwrap();
    let s = &samples["9"];
    assert_eq!((s.gpu_util, s.gpu_power, s.gpu_mem_max), (0.0, 0.0, 0.0));
}

#[tokio::test]
async fn unresolved_processes_contribute_nothing() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("42", descriptor(1, 1));
    cluster.resolver.assign(100, "42");
    cluster.gpus.set_devices(vec![
        // pid 999 exited or is outside any job
        device(0, 70.0, 200.0, &[(100, 1500.0), (999, 8000.0)]),
        device(1, 90.0, 300.0, &[(998, 6000.0)]),
    ]);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let samples = collect_samples(&descriptors, cluster.gpus.as_ref(), cluster.resolver.as_ref())
        .await
        .unwrap();
    let s = &samples["42"];
    assert_eq!(s.gpu_util, 70.0);
    assert_eq!(s.gpu_power, 200.0);
    assert_eq!(s.gpu_mem_max, 1500.0);
}

#[tokio::test]
async fn shared_device_is_credited_to_last_resolved_job() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("1", descriptor(1, 1));
    cluster.scheduler.add_job("2", descriptor(1, 1));
    cluster.resolver.assign(10, "1");
    cluster.resolver.assign(20, "2");
    cluster
        .gpus
        .set_devices(vec![device(0, 60.0, 180.0, &[(10, 1000.0), (20, 500.0), (30, 99.0)])]);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let samples = collect_samples(&descriptors, cluster.gpus.as_ref(), cluster.resolver.as_ref())
        .await
        .unwrap();

    assert_eq!(samples["2"].gpu_util, 60.0);
    assert_eq!(samples["2"].gpu_power, 180.0);
    // Memory of every resolved process on the device counts toward the total.
    assert_eq!(samples["2"].gpu_mem_max, 1500.0);
    assert_eq!(samples["1"].gpu_util, 0.0);
    assert_eq!(samples["1"].gpu_power, 0.0);
}

#[tokio::test]
async fn memory_peak_is_max_over_devices() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("3", descriptor(2, 1));
    cluster.resolver.assign(1, "3");
    cluster.resolver.assign(2, "3");
    cluster.resolver.assign(3, "3");
    cluster.gpus.set_devices(vec![
        device(0, 10.0, 50.0, &[(1, 700.0), (2, 800.0)]),
        device(1, 10.0, 50.0, &[(3, 1200.0)]),
    ]);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let samples = collect_samples(&descriptors, cluster.gpus.as_ref(), cluster.resolver.as_ref())
        .await
        .unwrap();
    assert_eq!(samples["3"].gpu_mem_max, 1500.0);
}

#[tokio::test]
async fn devices_of_untracked_jobs_are_ignored() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("1", descriptor(1, 1));
    cluster.scheduler.add_job("2", descriptor(2, 2));
    cluster.resolver.assign(10, "2");
    cluster
        .gpus
        .set_devices(vec![device(0, 100.0, 300.0, &[(10, 5000.0)])]);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let samples = collect_samples(&descriptors, cluster.gpus.as_ref(), cluster.resolver.as_ref())
        .await
        .unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples["1"].gpu_util, 0.0);
}

#[tokio::test]
async fn gpu_listing_failure_is_an_error() {
    let cluster = Cluster::new();
    cluster.scheduler.add_job("1", descriptor(1, 1));
    cluster.gpus.set_down(true);

    let descriptors = load_job_descriptors(cluster.scheduler.as_ref()).await.unwrap();
    let err = collect_samples(&descriptors, cluster.gpus.as_ref(), cluster.resolver.as_ref())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("reading GPU telemetry"));
}
