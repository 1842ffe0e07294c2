use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

use super::ack_timer::*;
use super::rtx_timer::*;

mod test_rto_manager {
    use super::*;

    #[test]
    fn test_initial_rto() {
        let m = RtoManager::new();
        assert_eq!(m.get_rto(), RTO_INITIAL);
    }

    #[test]
    fn test_rto_calculation_small_rtt() {
        let mut m = RtoManager::new();
        let exp = [1800, 1500, 1275, 1106, 1000];

        for (i, rtt) in [600u64, 600, 600, 600, 600].iter().enumerate() {
            m.set_new_rtt(*rtt);
            assert_eq!(m.get_rto(), exp[i]);
        }
    }

    #[test]
    fn test_rto_calculation_large_rtt() {
        let mut m = RtoManager::new();
        let exp = [60000, 60000, 60000, 55312, 48984];

        for (i, rtt) in [30000u64, 30000, 30000, 30000, 30000].iter().enumerate() {
            m.set_new_rtt(*rtt);
            assert_eq!(m.get_rto(), exp[i]);
        }
    }

    #[test]
    fn test_rto_first_measurement() {
        let mut m = RtoManager::new();
        // First sample r: SRTT = r, RTTVAR = r/2, RTO = SRTT + 4*RTTVAR.
        let srtt = m.set_new_rtt(600);
        assert_eq!(srtt, 600.0);
        assert_eq!(m.rttvar, 300.0);
        assert_eq!(m.get_rto(), 1800);
    }

    #[test]
    fn test_rto_smoothing() {
        let mut m = RtoManager::new();
        m.set_new_rtt(600);
        // RTTVAR = 3/4 * 300 + 1/4 * |600 - 820| = 280
        // SRTT   = 7/8 * 600 + 1/8 * 820 = 627.5
        let srtt = m.set_new_rtt(820);
        assert_eq!(srtt, 627.5);
        assert_eq!(m.rttvar, 280.0);
        assert_eq!(m.get_rto(), 1747); // 627.5 + 4 * 280 = 1747.5, truncated
    }

    #[test]
    fn test_rto_is_clamped() {
        let mut m = RtoManager::new();
        m.set_new_rtt(100);
        assert_eq!(m.get_rto(), RTO_MIN);

        let mut m = RtoManager::new();
        m.set_new_rtt(300_000);
        assert_eq!(m.get_rto(), RTO_MAX);
    }

    #[test]
    fn test_rto_reset() {
        let mut m = RtoManager::new();
        m.set_new_rtt(600);
        assert_ne!(m.get_rto(), RTO_INITIAL);
        m.reset();
        assert_eq!(m.get_rto(), RTO_INITIAL);
        assert_eq!(m.srtt, 0.0);
        assert_eq!(m.rttvar, 0.0);
    }

    #[test]
    fn test_timeout_doubling() {
        assert_eq!(calculate_next_timeout(1000, 0), 1000);
        assert_eq!(calculate_next_timeout(1000, 1), 2000);
        assert_eq!(calculate_next_timeout(1000, 2), 4000);
        assert_eq!(calculate_next_timeout(1000, 5), 32000);
        assert_eq!(calculate_next_timeout(1000, 6), RTO_MAX);
        assert_eq!(calculate_next_timeout(1000, 63), RTO_MAX);
    }
}

mod test_rtx_timer {
    use super::*;

    struct TestObserver {
        name: &'static str,
        timeout_tx: mpsc::Sender<(RtxTimerId, usize)>,
        failure_tx: mpsc::Sender<RtxTimerId>,
    }

    #[async_trait::async_trait]
    impl RtxTimerObserver for TestObserver {
        async fn on_retransmission_timeout(&mut self, timer_id: RtxTimerId, n_rtos: usize) {
            log::debug!("[{}] timeout {} {}", self.name, timer_id, n_rtos);
            let _ = self.timeout_tx.try_send((timer_id, n_rtos));
        }

        async fn on_retransmission_failure(&mut self, timer_id: RtxTimerId) {
            let _ = self.failure_tx.try_send(timer_id);
        }
    }

    #[tokio::test]
    async fn test_timer_fires_and_backs_off() {
        let (timeout_tx, mut timeout_rx) = mpsc::channel(16);
        let (failure_tx, _failure_rx) = mpsc::channel(16);
        let obs = Arc::new(Mutex::new(TestObserver {
            name: "backoff",
            timeout_tx,
            failure_tx,
        }));

        let timer = RtxTimer::new(Arc::downgrade(&obs), RtxTimerId::T3RTX, NO_MAX_RETRANS);
        assert!(timer.start(10).await);
        assert!(timer.is_running().await);
        // A second start while armed is a no-op.
        assert!(!timer.start(10).await);

        let (id, n1) = timeout_rx.recv().await.unwrap();
        assert_eq!(id, RtxTimerId::T3RTX);
        assert_eq!(n1, 1);
        let (_, n2) = timeout_rx.recv().await.unwrap();
        assert_eq!(n2, 2);

        timer.stop().await;
        assert!(!timer.is_running().await);
    }

    #[tokio::test]
    async fn test_timer_failure_after_max_retrans() {
        let (timeout_tx, mut timeout_rx) = mpsc::channel(16);
        let (failure_tx, mut failure_rx) = mpsc::channel(16);
        let obs = Arc::new(Mutex::new(TestObserver {
            name: "failure",
            timeout_tx,
            failure_tx,
        }));

        let timer = RtxTimer::new(Arc::downgrade(&obs), RtxTimerId::T1Init, 2);
        assert!(timer.start(5).await);

        assert_eq!(timeout_rx.recv().await.unwrap().1, 1);
        assert_eq!(timeout_rx.recv().await.unwrap().1, 2);
        assert_eq!(failure_rx.recv().await.unwrap(), RtxTimerId::T1Init);

        // after failure the armed task has exited; nothing further fires
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(timeout_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timer_stop_before_first_fire() {
        let (timeout_tx, mut timeout_rx) = mpsc::channel(16);
        let (failure_tx, _failure_rx) = mpsc::channel(16);
        let obs = Arc::new(Mutex::new(TestObserver {
            name: "stop",
            timeout_tx,
            failure_tx,
        }));

        let timer = RtxTimer::new(Arc::downgrade(&obs), RtxTimerId::T2Shutdown, NO_MAX_RETRANS);
        assert!(timer.start(200).await);
        timer.stop().await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(timeout_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timer_exits_when_observer_dropped() {
        let (timeout_tx, mut timeout_rx) = mpsc::channel(16);
        let (failure_tx, _failure_rx) = mpsc::channel(16);
        let obs = Arc::new(Mutex::new(TestObserver {
            name: "dropped",
            timeout_tx,
            failure_tx,
        }));

        let timer = RtxTimer::new(Arc::downgrade(&obs), RtxTimerId::T3RTX, NO_MAX_RETRANS);
        assert!(timer.start(10).await);
        drop(obs);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(timeout_rx.try_recv().is_err());
    }
}

mod test_ack_timer {
    use super::*;

    struct TestObserver {
        fired_tx: mpsc::Sender<()>,
    }

    #[async_trait::async_trait]
    impl AckTimerObserver for TestObserver {
        async fn on_ack_timeout(&mut self) {
            let _ = self.fired_tx.try_send(());
        }
    }

    #[tokio::test]
    async fn test_ack_timer_fires_once() {
        let (fired_tx, mut fired_rx) = mpsc::channel(16);
        let obs = Arc::new(Mutex::new(TestObserver { fired_tx }));

        let mut timer = AckTimer::new(Arc::downgrade(&obs), ACK_INTERVAL);
        assert!(timer.start());
        assert!(timer.is_running());
        // arming while armed is a no-op: triggers coalesce
        assert!(!timer.start());

        fired_rx.recv().await.unwrap();
        timer.stop();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fired_rx.try_recv().is_err());
        assert!(!timer.is_running());
    }

    #[tokio::test]
    async fn test_ack_timer_can_be_rearmed_after_stop() {
        let (fired_tx, mut fired_rx) = mpsc::channel(16);
        let obs = Arc::new(Mutex::new(TestObserver { fired_tx }));

        let mut timer = AckTimer::new(Arc::downgrade(&obs), ACK_INTERVAL);
        assert!(timer.start());
        fired_rx.recv().await.unwrap();
        timer.stop();

        assert!(timer.start());
        fired_rx.recv().await.unwrap();
        timer.stop();
    }
}
