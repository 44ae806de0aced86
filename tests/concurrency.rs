mod common;

use common::{eval, interp_with_output};
use skiff::{CancelToken, Error, Value};
use std::time::{Duration, Instant};

#[test]
fn tasks_communicate_over_channels() {
    let src = r#"
ch := make(chan int)
go func() {
    for i := 1; i <= 100; i++ {
        ch <- i
    }
    close(ch)
}()
sum := 0
for v := range ch {
    sum = sum + v
}
sum
"#;
    assert!(eval(src).equal(&Value::Int(5050)));
}

#[test]
fn buffered_channels_do_not_block_within_capacity() {
    let src = r#"
ch := make(chan string, 2)
ch <- "a"
ch <- "b"
close(ch)
first := <-ch
second := <-ch
first + second
"#;
    assert!(eval(src).equal(&Value::str("ab")));
}

#[test]
fn receive_reports_closed_channels() {
    let src = r#"
ch := make(chan int, 1)
ch <- 7
close(ch)
a, ok1 := <-ch
b, ok2 := <-ch
_ = b
r := 0
if ok1 {
    r = r + a
}
if !ok2 {
    r = r + 100
}
r
"#;
    assert!(eval(src).equal(&Value::Int(107)));
}

#[test]
fn select_picks_the_ready_case_or_default() {
    let src = r#"
ready := make(chan int, 1)
idle := make(chan int)
ready <- 5
picked := 0
select {
case v := <-ready:
    picked = v
case <-idle:
    picked = -1
}
fell := 0
select {
case <-idle:
    fell = -1
default:
    fell = 42
}
picked*100 + fell
"#;
    assert!(eval(src).equal(&Value::Int(542)));
}

#[test]
fn send_on_closed_channel_panics() {
    let (interp, _, _) = interp_with_output();
    let src = r#"
ch := make(chan int, 1)
close(ch)
ch <- 1
"#;
    match interp.eval(src) {
        Err(Error::Panic { value, .. }) => {
            assert!(value.to_string().contains("closed channel"))
        }
        other => panic!("unexpected result: {:?}", other.map(|v| v.to_string())),
    }
}

#[test]
fn cancellation_stops_an_infinite_loop_in_bounded_time() {
    let (interp, _, _) = interp_with_output();
    let token = CancelToken::new();
    let timer = {
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };

    let started = Instant::now();
    let result = interp.eval_with_context(&token, "for {}\n");
    timer.join().expect("timer");

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation took {:?}",
        started.elapsed()
    );
    // The interpreter is reusable after a cancelled evaluation.
    let again = interp.eval("1 + 1\n").expect("eval after cancel");
    assert!(again.equal(&Value::Int(2)));
}

#[test]
fn cancellation_unblocks_channel_operations() {
    let (interp, _, _) = interp_with_output();
    let token = CancelToken::new();
    let timer = {
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };

    let started = Instant::now();
    let src = r#"
ch := make(chan int)
<-ch
"#;
    let result = interp.eval_with_context(&token, src);
    timer.join().expect("timer");

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancellation_before_any_input_reads_is_clean() {
    let (interp, _, _) = interp_with_output();
    let token = CancelToken::new();
    token.cancel();
    let result = interp.eval_with_context(&token, "x_never := 1\n");
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn tasks_share_package_state() {
    let src = r#"
done := make(chan bool)
n := 0
go func() {
    n = 41
    done <- true
}()
<-done
n + 1
"#;
    assert!(eval(src).equal(&Value::Int(42)));
}

#[test]
fn unbuffered_sends_rendezvous_with_receivers() {
    let src = r#"
ch := make(chan int)
acks := make(chan bool)
go func() {
    ch <- 10
    acks <- true
}()
v := <-ch
<-acks
v
"#;
    assert!(eval(src).equal(&Value::Int(10)));
}
