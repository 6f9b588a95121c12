use libpstat::{Instrument, Method, MethodSet, ExperimentParameters, MeasurementRecord, Outcome};
use libpstat::codec::{adc_code_to_voltage, current_from_voltage, DacCodePair};
use libpstat::methods::SweepMachine;
use libpstat::registers::{PgaGain, SeqId};
use libpstat::sim::{SimChip, Loopback};
use serial_test::serial;
use assert_matches::assert_matches;


fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn run(chip: SimChip, method: Method, params: &ExperimentParameters)
    -> (Outcome, Instrument<SimChip, Loopback>) {

    let line = chip.line();
    let mut instr = Instrument::new(chip, Loopback::new(), line);
    instr.boot().unwrap();
    instr.config_mut().unwrap().enabled |= MethodSet::OCP;

    instr.set_method(method).unwrap()
         .set_parameters(params).unwrap()
         .start().unwrap();

    let outcome = instr.run().unwrap();
    (outcome, instr)
}

fn current(code: u32) -> f32 {
    current_from_voltage(adc_code_to_voltage(code, PgaGain::Gain1p5, 1820.0), 20_000.0)
}

fn assert_sequential(records: &[MeasurementRecord]) {
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec.pair, i as u32 + 1);
    }
    assert!(records.windows(2).all(|w| w[1].timestamp >= w[0].timestamp));
}


#[test]
#[serial]
fn chronoamperometry() {
    init_logger();

    let (outcome, instr) = run(SimChip::new(), Method::CA, &ExperimentParameters::default());
    let records = instr.transport().records();

    // 4 s, 3 s and 3 s sampled every 100 ms
    assert_eq!(outcome, Outcome::Completed { records: 100 });
    assert_eq!(records.len(), 100);
    assert_sequential(&records);

    let expected = current(1000);
    for rec in records.iter() {
        assert_eq!(rec.cycle, 1);
        assert!((rec.current - expected).abs() < 1e-3, "{} != {}", rec.current, expected);
    }

    assert!((records[0].voltage - 800.0).abs() < 2.0);
    assert!((records[39].voltage - 800.0).abs() < 2.0);
    assert!((records[40].voltage + 400.0).abs() < 2.0);
    assert!((records[99].voltage + 300.0).abs() < 2.0);

    assert!(instr.transport().sent().iter().all(|(_, m)| *m == Method::CA));
    assert_eq!(instr.driver().collisions(), 0);
    assert_eq!(instr.driver().shutdowns(), 1);
}

#[test]
#[serial]
fn cyclic_voltammetry() {
    init_logger();

    let params = ExperimentParameters {
        start: 0.0,
        lower: -300.0,
        upper: 300.0,
        step_size: 10.0,
        cycles: 2,
        ..Default::default()
    };
    let per_cycle = SweepMachine::cyclic(&params).unwrap().steps_per_cycle();

    // current follows the bias code
    let chip = SimChip::new().with_model(|pair: &DacCodePair| 20_000 + pair.bias);
    let (outcome, instr) = run(chip, Method::CV, &params);
    let records = instr.transport().records();

    assert_eq!(outcome.records(), 2 * per_cycle);
    assert_eq!(records.len(), 2 * per_cycle);
    assert_sequential(&records);
    assert_eq!(records[per_cycle - 1].cycle, 1);
    assert_eq!(records[per_cycle].cycle, 2);

    let max = records.iter().map(|r| r.voltage).fold(f32::MIN, f32::max);
    let min = records.iter().map(|r| r.voltage).fold(f32::MAX, f32::min);
    assert!((max - 300.0).abs() < 11.0);
    assert!((min + 300.0).abs() < 11.0);

    // every record carries the window sampled under its own potential
    let history = instr.driver().dac_history();
    for (i, rec) in records.iter().enumerate() {
        let pair = history[i + 1];
        assert!((rec.current - current(20_000 + pair.bias)).abs() < 1e-3);
    }

    // the timer alternates step blocks with the ADC sequence
    assert_eq!(&instr.driver().fired()[..4], &[SeqId::Seq0, SeqId::Seq2, SeqId::Seq1, SeqId::Seq2]);
    assert_eq!(instr.driver().collisions(), 0);
    assert_eq!(instr.driver().shutdowns(), 1);
}

#[test]
#[serial]
fn linear_sweep() {
    init_logger();

    let params = ExperimentParameters {
        start: -100.0,
        stop: 100.0,
        step_size: 5.0,
        ..Default::default()
    };

    let (_, instr) = run(SimChip::new(), Method::LSV, &params);
    let records = instr.transport().records();

    assert!(records.len() > 30);
    assert!(records.windows(2).all(|w| w[1].voltage > w[0].voltage));
    assert!((records[0].voltage + 100.0).abs() < 2.0);
}

#[test]
#[serial]
fn linear_sweep_cycles() {
    init_logger();

    let params = ExperimentParameters {
        start: -100.0,
        stop: 100.0,
        step_size: 10.0,
        cycles: 2,
        ..Default::default()
    };
    let per_cycle = SweepMachine::linear(&params).unwrap().steps_per_cycle();

    let (outcome, instr) = run(SimChip::new(), Method::LSV, &params);
    let records = instr.transport().records();

    assert_eq!(outcome.records(), 2 * per_cycle);
    assert_sequential(&records);
    assert_eq!(records[per_cycle - 1].cycle, 1);
    assert_eq!(records[per_cycle].cycle, 2);
    assert!((records[per_cycle].voltage - records[0].voltage).abs() < 1e-3);
    assert_eq!(instr.driver().collisions(), 0);
}

#[test]
#[serial]
fn differential_pulse() {
    init_logger();

    let params = ExperimentParameters {
        start: 0.0,
        stop: 200.0,
        ..ExperimentParameters::pulse_defaults()
    };

    let chip = SimChip::new().with_model(|pair: &DacCodePair| 30_000 + pair.bias);
    let (outcome, instr) = run(chip, Method::DPV, &params);
    let records = instr.transport().records();

    // one record per staircase level
    assert_eq!(outcome, Outcome::Completed { records: 5 });
    assert_sequential(&records);

    // current is the pulse window minus the base window of the same level
    let history = instr.driver().dac_history();
    for (k, rec) in records.iter().enumerate() {
        let base = history[1 + 2 * k].bias;
        let pulse = history[2 + 2 * k].bias;
        let expected = current(30_000 + pulse) - current(30_000 + base);
        assert!((rec.current - expected).abs() < 1e-3, "{}: {} != {}", k, rec.current, expected);
        assert!(rec.current < 0.0);
    }

    assert!((records[4].voltage - 200.0).abs() < 2.0);
    assert_eq!(instr.driver().collisions(), 0);
}

#[test]
#[serial]
fn normal_pulse() {
    init_logger();

    let params = ExperimentParameters {
        start: 0.0,
        stop: 100.0,
        base_potential: -50.0,
        ..ExperimentParameters::pulse_defaults()
    };

    let (outcome, instr) = run(SimChip::new(), Method::NPV, &params);
    let records = instr.transport().records();

    assert_eq!(outcome.records(), 3);
    assert!(records.iter().all(|r| (r.current - current(1000)).abs() < 1e-3));
    assert!((records[2].voltage - 100.0).abs() < 2.0);
}

#[test]
#[serial]
fn square_wave() {
    init_logger();

    let params = ExperimentParameters {
        start: 0.0,
        stop: 100.0,
        potential_steps: vec![20.0, 25.0],
        ..ExperimentParameters::pulse_defaults()
    };

    let (outcome, instr) = run(SimChip::new(), Method::SWV, &params);

    // constant ADC reading: forward and reverse cancel
    assert_eq!(outcome.records(), 6);
    assert!(instr.transport().records().iter().all(|r| r.current.abs() < 1e-4));
}

#[test]
#[serial]
fn open_circuit_potential() {
    init_logger();

    let params = ExperimentParameters {
        measurement_length: 1000.0,
        sampling_interval: 100.0,
        ..Default::default()
    };

    let (outcome, instr) = run(SimChip::new(), Method::OCP, &params);
    let records = instr.transport().records();

    assert_matches!(outcome, Outcome::Completed { records: 10 });
    assert_sequential(&records);

    let expected = adc_code_to_voltage(1000, PgaGain::Gain1p5, 1820.0);
    for rec in records.iter() {
        assert_eq!(rec.current, 0.0);
        assert!((rec.voltage - expected).abs() < 1e-3);
    }

    // the DAC is set once by the initialisation sequence
    assert_eq!(instr.driver().dac_history().len(), 1);
    assert_eq!(instr.driver().shutdowns(), 1);
}
