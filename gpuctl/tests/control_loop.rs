//! End-to-end behaviour of the control loop against the simulated GPU.

use std::time::Duration;

use gpuctl::config::Config;
use gpuctl::control::{FanMode, GpuController};
use gpuctl::device::SimulatedGpu;
use gpuctl::device::sim::{Command, Fault, Operation};
use gpuctl::metrics::{NoopMetrics, WatchMetrics};
use tokio_util::sync::CancellationToken;

fn config() -> Config {
    Config::default().finalize().unwrap()
}

fn fan_commands(gpu: &SimulatedGpu) -> Vec<i32> {
    gpu.commands()
        .into_iter()
        .filter_map(|c| match c {
            Command::SetFanSpeed(speed) => Some(speed),
            _ => None,
        })
        .collect()
}

fn power_commands(gpu: &SimulatedGpu) -> Vec<i32> {
    gpu.commands()
        .into_iter()
        .filter_map(|c| match c {
            Command::SetPowerLimit(watts) => Some(watts),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn should_follow_heat_up_and_cool_down() {
    let gpu = SimulatedGpu::default();
    let mut controller = GpuController::initialize(gpu.clone(), NoopMetrics, config())
        .await
        .unwrap();

    controller.tick().await.unwrap();
    assert_eq!(controller.fan_mode(), FanMode::Auto);

    gpu.set_temperature(70);
    for _ in 0..5 {
        controller.tick().await.unwrap();
    }

    let speeds = fan_commands(&gpu);
    assert!(!speeds.is_empty());
    assert!(speeds.windows(2).all(|w| w[0] < w[1]), "{speeds:?}");
    assert_eq!(gpu.state().fan_speeds, vec![61, 61]);
    assert_eq!(controller.fan_mode(), FanMode::Manual);

    gpu.set_temperature(40);
    for _ in 0..5 {
        controller.tick().await.unwrap();
    }

    assert_eq!(controller.fan_mode(), FanMode::Auto);
    assert!(gpu.state().auto_fan);
}

#[tokio::test(start_paused = true)]
async fn should_trade_power_for_temperature_and_give_it_back() {
    let gpu = SimulatedGpu::default();
    gpu.set_temperature(95);
    let mut controller = GpuController::initialize(gpu.clone(), NoopMetrics, config())
        .await
        .unwrap();
    gpu.clear_commands();

    // First tick pins the fans; every later tick finds them saturated.
    for _ in 0..10 {
        controller.tick().await.unwrap();
    }

    assert_eq!(gpu.state().fan_speeds, vec![100, 100]);
    assert_eq!(
        power_commands(&gpu),
        vec![310, 300, 290, 280, 270, 260, 250, 240, 230]
    );

    gpu.clear_commands();
    gpu.set_temperature(70);
    for _ in 0..3 {
        controller.tick().await.unwrap();
    }

    assert_eq!(power_commands(&gpu), vec![250, 270, 290]);
}

#[tokio::test(start_paused = true)]
async fn should_never_leave_hardware_limits() {
    let gpu = SimulatedGpu::default();
    let mut controller = GpuController::initialize(gpu.clone(), NoopMetrics, config())
        .await
        .unwrap();

    for temperature in [45, 60, 85, 120, 120, 120, 30, 99, 51, 50, 49, 100, 20] {
        gpu.set_temperature(temperature);
        for _ in 0..4 {
            controller.tick().await.unwrap();
        }
    }

    // The simulator rejects out-of-range writes, so any violation would
    // have surfaced as a tick error above.
    let limits = controller.limits();
    for speed in fan_commands(&gpu) {
        assert!((limits.fan.min..=limits.fan.max).contains(&speed));
    }
    for watts in power_commands(&gpu) {
        assert!((limits.power.min..=limits.power.max).contains(&watts));
    }
}

#[tokio::test(start_paused = true)]
async fn should_keep_ticking_through_hanging_reads() {
    let gpu = SimulatedGpu::default();
    let (metrics, rx) = WatchMetrics::new();
    let controller = GpuController::initialize(gpu.clone(), metrics, config())
        .await
        .unwrap();
    gpu.inject(Operation::Temperature, Fault::Hang);
    gpu.inject(Operation::PowerLimit, Fault::Hang);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(controller.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(7)).await;

    let snapshot = rx.borrow().clone().unwrap();
    assert!(snapshot.state.degraded);
    assert_eq!(snapshot.temperature.current, 45);

    cancel.cancel();
    handle.await.unwrap().unwrap();
    assert!(gpu.state().auto_fan);
}

#[tokio::test(start_paused = true)]
async fn should_only_restore_defaults_in_monitor_mode() {
    let gpu = SimulatedGpu::default();
    gpu.set_temperature(90);
    gpu.set_fan_speeds(vec![100, 100]);
    let config = Config {
        monitor: true,
        ..config()
    };
    let controller = GpuController::initialize(gpu.clone(), NoopMetrics, config)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(controller.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(9)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(
        gpu.commands(),
        vec![Command::SetPowerLimit(320), Command::EnableAutoFan]
    );
}

#[tokio::test(start_paused = true)]
async fn should_not_overlap_slow_ticks() {
    let gpu = SimulatedGpu::default();
    let config = Config {
        device_timeout_ms: 1_900,
        ..config()
    };
    let (metrics, mut rx) = WatchMetrics::new();
    let controller = GpuController::initialize(gpu.clone(), metrics, config)
        .await
        .unwrap();
    // Every tick spends 3.8s on two hanging reads, longer than the interval.
    gpu.inject(Operation::Temperature, Fault::Hang);
    gpu.inject(Operation::FanSpeeds, Fault::Hang);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(controller.run(cancel.clone()));
    let start = tokio::time::Instant::now();
    let mut ticks = Vec::new();
    while ticks.len() < 3 {
        rx.changed().await.unwrap();
        ticks.push(start.elapsed());
    }
    cancel.cancel();
    handle.await.unwrap().unwrap();

    for pair in ticks.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(3_800), "{ticks:?}");
    }
}
