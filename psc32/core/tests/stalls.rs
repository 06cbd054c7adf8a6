//! Stall-contract coverage: suspension points, latch edges and the
//! pending-memory cache.

use psc32_core::{asm, Host, Load, Processor, State};

#[derive(Debug, Default)]
struct Recorder {
    reads: Vec<u32>,
    writes: Vec<(u32, String)>,
    channels: Vec<(u32, String)>,
}

impl Host for Recorder {
    fn memory_read(&mut self, addr: u32) {
        self.reads.push(addr);
    }
    fn memory_write(&mut self, addr: u32, value: &str) {
        self.writes.push((addr, value.to_string()));
    }
    fn channel_write(&mut self, index: u32, value: &str) {
        self.channels.push((index, value.to_string()));
    }
}

fn boot(lines: &[&str]) -> Processor {
    let program = asm::compile(lines).expect("program assembles");
    let mut cpu = Processor::default();
    cpu.load(program);
    cpu.start();
    cpu
}

#[test]
fn consuming_read_clears_the_latch_even_when_a_later_operand_stalls() {
    // arg2 consumes in0, then arg3 stalls on the unset in1; the consumed
    // signal is gone and the instruction retries from scratch.
    let mut cpu = boot(&["find ir0 in0 in1"]);
    cpu.channel(0, "haystack").unwrap();
    let mut host = Recorder::default();

    assert_eq!(cpu.cycle(&mut host), Load::Underloaded);
    assert_eq!(cpu.ip(), 0);
    assert!(!cpu.input(0).unwrap().set);

    // Supplying only in1 cannot complete the retry: in0 was consumed.
    cpu.channel(1, "hay").unwrap();
    cpu.cycle(&mut host);
    assert_eq!(cpu.ip(), 0);

    // With both latches set the instruction completes.
    cpu.channel(0, "haystack").unwrap();
    cpu.channel(1, "hay").unwrap();
    cpu.cycle(&mut host);
    assert_eq!(cpu.registers().ir[0], 0);
    assert_eq!(cpu.ip(), 1);
}

#[test]
fn memory_cache_answers_repeat_reads_of_the_same_address() {
    let mut cpu = boot(&["mov ir1 [3]", "mov ir2 [3]"]);
    let mut host = Recorder::default();

    cpu.cycle(&mut host);
    assert_eq!(host.reads, vec![3]);
    cpu.memory("5");

    cpu.cycle(&mut host);
    assert_eq!(cpu.registers().ir[1], 5);
    assert_eq!(cpu.registers().ir[2], 5);
    // The second read of address 3 was served from the cached answer.
    assert_eq!(host.reads, vec![3]);
}

#[test]
fn a_different_address_invalidates_the_cache() {
    let mut cpu = boot(&["mov ir1 [3]", "mov ir2 [4]"]);
    let mut host = Recorder::default();

    cpu.cycle(&mut host);
    cpu.memory("5");
    cpu.cycle(&mut host);
    assert_eq!(host.reads, vec![3, 4]);
    assert_eq!(cpu.registers().ir[1], 5);
    assert_eq!(cpu.registers().ir[2], 0);

    cpu.memory("6");
    cpu.cycle(&mut host);
    assert_eq!(cpu.registers().ir[2], 6);
}

#[test]
fn memory_write_ends_the_tick() {
    let mut cpu = boot(&["mov [10] 1", "mov [11] 2"]);
    let mut host = Recorder::default();

    cpu.cycle(&mut host);
    assert_eq!(host.writes, vec![(10, "1".to_string())]);

    cpu.cycle(&mut host);
    assert_eq!(host.writes.len(), 2);
    assert_eq!(host.writes[1], (11, "2".to_string()));
}

#[test]
fn memory_text_materializes_as_int_and_string() {
    let mut cpu = boot(&["mov sr0 [3]", "mov ir0 [3]"]);
    let mut host = Recorder::default();

    cpu.cycle(&mut host);
    cpu.memory("42");
    cpu.cycle(&mut host);

    assert_eq!(cpu.registers().sr[0].as_deref(), Some("42"));
    assert_eq!(cpu.registers().ir[0], 42);
}

#[test]
fn unset_output_does_not_block_other_channels() {
    let mut cpu = boot(&["mov ou1 \"b\"", "mov ou0 \"a\""]);
    let mut host = Recorder::default();

    cpu.cycle(&mut host);

    // Flush delivers in ascending channel order regardless of write order.
    assert_eq!(
        host.channels,
        vec![(0, "a".to_string()), (1, "b".to_string())]
    );
}

#[test]
fn flag_transfer_round_trips_through_a_program() {
    let mut cpu = boot(&[
        "cmp ir0 0",  // ZF set
        "flr ir1",
        "fls ir1",
        "flr ir2",
    ]);
    let mut host = Recorder::default();

    cpu.cycle(&mut host);

    // flr captured ZF; fls restored it from ir1; the second flr read the
    // same picture back.
    assert_eq!(cpu.registers().ir[1], 0b0010);
    assert_eq!(cpu.registers().ir[2], 0b0010);
}

#[test]
fn inr_observes_latch_bits_without_consuming() {
    let mut cpu = boot(&["inr ir0", "inr ir1"]);
    cpu.channel(0, "x").unwrap();
    cpu.channel(2, "y").unwrap();
    let mut host = Recorder::default();

    cpu.cycle(&mut host);

    assert_eq!(cpu.registers().ir[0], 0b0101);
    assert_eq!(cpu.registers().ir[1], 0b0101);
    assert!(cpu.input(0).unwrap().set);
}

#[test]
fn halted_processor_reports_underload_until_restarted() {
    let mut cpu = boot(&["brk"]);
    let mut host = Recorder::default();

    cpu.cycle(&mut host);
    assert_eq!(cpu.state(), State::Stopped);

    assert_eq!(cpu.cycle(&mut host), Load::Underloaded);
    assert_eq!(cpu.ip(), 1);
}

#[test]
fn adc_chains_a_carry_across_words() {
    // 0xFFFFFFFF + 1 carries; the adc right after folds CF into the sum.
    let mut cpu = boot(&[
        "mov ir1 10",
        "mov ir0 0xFFFFFFFF",
        "add ir0 1",
        "adc ir1 0",
    ]);
    let mut host = Recorder::default();

    cpu.cycle(&mut host);

    assert_eq!(cpu.registers().ir[0], 0);
    assert_eq!(cpu.registers().ir[1], 11);
}
