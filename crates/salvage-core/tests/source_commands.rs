//! Tests for `source info` and `source list` over hand-built modules

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use salvage_core::error::SalvageError;
use salvage_core::source::{repeat_command, source_info, source_list, SourceInfoOptions, SourceListOptions};
use salvage_core::symbols::{
    AddressRange, CompileUnit, FileSpec, Function, InlinedBlock, LineEntry, LineTable, Module, Symbol, SymbolKind,
    SymbolName,
};
use salvage_core::target::Target;
use salvage_core::types::Architecture;
use tempfile::TempDir;

struct Fixture
{
    _dir: TempDir,
    source: FileSpec,
    target: Target,
}

fn write_source(dir: &Path, name: &str, lines: u32) -> FileSpec
{
    let path = dir.join(name);
    let text: String = (1..=lines).map(|n| format!("line {n}\n")).collect();
    fs::write(&path, text).unwrap();
    FileSpec::from_path(&path)
}

fn row(base: u64, size: u64, file: &FileSpec, line: u32, column: u32) -> LineEntry
{
    LineEntry::new(AddressRange::new(base, size), file.clone(), line, column)
}

fn inlined(name: &str, base: u64) -> InlinedBlock
{
    InlinedBlock::new(SymbolName::plain(name), [AddressRange::new(base, 0x8)], 1)
}

/// `compute` spans lines 42..60, `main` starts at line 3 and `driver` holds
/// three inlined copies of `helper` (all at line 20) and two of `twin`
/// (lines 25 and 50).
fn demo_module(file: &FileSpec) -> Module
{
    let table = LineTable::new(vec![
        row(0x1000, 0x10, file, 42, 0),
        row(0x1010, 0x10, file, 44, 5),
        row(0x1020, 0x10, file, 60, 0),
        row(0x2000, 0x8, file, 3, 0),
        row(0x2008, 0x8, file, 4, 0),
        row(0x3000, 0x8, file, 20, 0),
        row(0x3008, 0x8, file, 25, 0),
        row(0x3010, 0x8, file, 20, 0),
        row(0x3018, 0x8, file, 50, 0),
        row(0x3020, 0x8, file, 20, 0),
        row(0x3028, 0x8, file, 30, 0),
    ]);
    let driver = Function::new(SymbolName::plain("driver"), [AddressRange::new(0x3000, 0x30)])
        .with_inlined(inlined("helper", 0x3000))
        .with_inlined(inlined("twin", 0x3008))
        .with_inlined(inlined("helper", 0x3010))
        .with_inlined(inlined("twin", 0x3018))
        .with_inlined(inlined("helper", 0x3020));
    let cu = CompileUnit::new(file.clone(), [], table)
        .with_function(Function::new(SymbolName::plain("compute"), [AddressRange::new(0x1000, 0x30)]))
        .with_function(Function::new(SymbolName::plain("main"), [AddressRange::new(0x2000, 0x10)]))
        .with_function(driver);
    Module::new(FileSpec::new("/bin/demo"), Architecture::X86_64)
        .with_compile_unit(cu)
        .with_symbol(Symbol::new(SymbolName::plain("compute_entry"), 0x1000, 0x30, SymbolKind::Code))
}

fn fixture() -> Fixture
{
    let dir = TempDir::new().unwrap();
    let source = write_source(dir.path(), "main.c", 60);
    let mut target = Target::new();
    target.add_image(demo_module(&source));
    Fixture {
        _dir: dir,
        source,
        target,
    }
}

/// Plain listing of `lines`, as `source list` prints them.
fn listing(lines: RangeInclusive<u32>) -> String
{
    lines.map(|n| format!("   {n:<4}\tline {n}\n")).collect()
}

fn count_headers(output: &str) -> usize
{
    output.lines().filter(|line| line.starts_with("File: ")).count()
}

#[test]
fn test_info_by_name_dedups_rows()
{
    let fx = fixture();
    let options = SourceInfoOptions {
        name: Some("compute".into()),
        ..Default::default()
    };
    let output = source_info(&fx.target, &options).unwrap();
    let src = &fx.source;
    assert_eq!(
        output.output,
        format!(
            "Lines found in module `demo\n\
             [0x0000000000001000-0x0000000000001010): {src}:42\n\
             [0x0000000000001010-0x0000000000001020): {src}:44:5\n\
             [0x0000000000001020-0x0000000000001030): {src}:60\n"
        )
    );
    assert!(output.warnings.is_empty());
}

#[test]
fn test_info_count_lets_one_extra_row_through()
{
    let fx = fixture();
    let options = SourceInfoOptions {
        name: Some("compute".into()),
        count: Some(1),
        ..Default::default()
    };
    let output = source_info(&fx.target, &options).unwrap();
    assert_eq!(output.output.lines().filter(|line| line.starts_with('[')).count(), 2);
}

#[test]
fn test_info_by_symbol_name_falls_back_to_function()
{
    let fx = fixture();
    let options = SourceInfoOptions {
        name: Some("compute_entry".into()),
        ..Default::default()
    };
    let output = source_info(&fx.target, &options).unwrap();
    assert!(output.output.contains(":44:5\n"));
}

#[test]
fn test_info_unknown_function()
{
    let fx = fixture();
    let options = SourceInfoOptions {
        name: Some("nope".into()),
        ..Default::default()
    };
    let err = source_info(&fx.target, &options).unwrap_err();
    assert_eq!(err.to_string(), "Could not find function named 'nope'.");
}

#[test]
fn test_info_by_file_address()
{
    let fx = fixture();
    let options = SourceInfoOptions {
        address: Some(0x2008),
        ..Default::default()
    };
    let output = source_info(&fx.target, &options).unwrap();
    assert_eq!(
        output.output,
        format!("Lines found in module `demo\n[0x0000000000002008-0x0000000000002010): {}:4\n", fx.source)
    );

    let options = SourceInfoOptions {
        address: Some(0x9999),
        ..Default::default()
    };
    let err = source_info(&fx.target, &options).unwrap_err();
    assert_eq!(err.to_string(), "Source information for file address 0x9999 not found in any modules.");
}

#[test]
fn test_info_by_load_address_applies_slide()
{
    let dir = TempDir::new().unwrap();
    let source = write_source(dir.path(), "main.c", 60);
    let mut target = Target::new();
    target.add_image_at(demo_module(&source), 0x10000);

    let options = SourceInfoOptions {
        address: Some(0x11010),
        ..Default::default()
    };
    let output = source_info(&target, &options).unwrap();
    assert_eq!(
        output.output,
        format!("Lines found in module `demo\n[0x0000000000011010-0x0000000000011020): {source}:44:5\n")
    );

    let options = SourceInfoOptions {
        address: Some(0x90000),
        ..Default::default()
    };
    let err = source_info(&target, &options).unwrap_err();
    assert_eq!(err.to_string(), "Unable to resolve address 0x90000.");
}

#[test]
fn test_info_by_file_and_line_range()
{
    let fx = fixture();
    let options = SourceInfoOptions {
        file: Some("main.c".into()),
        start_line: Some(42),
        end_line: Some(44),
        ..Default::default()
    };
    let output = source_info(&fx.target, &options).unwrap();
    let src = &fx.source;
    assert_eq!(
        output.output,
        format!(
            "Lines found for file main.c in compilation unit main.c in `demo\n\
             [0x0000000000001000-0x0000000000001010): {src}:42\n\
             [0x0000000000001010-0x0000000000001020): {src}:44:5\n"
        )
    );

    let options = SourceInfoOptions {
        file: Some("other.c".into()),
        ..Default::default()
    };
    let err = source_info(&fx.target, &options).unwrap_err();
    assert_eq!(err.to_string(), "No source filenames matched 'other.c'.");
}

#[test]
fn test_info_module_filter()
{
    let fx = fixture();
    let options = SourceInfoOptions {
        name: Some("main".into()),
        shlibs: vec!["libnope.dylib".into(), "demo".into()],
        ..Default::default()
    };
    let output = source_info(&fx.target, &options).unwrap();
    assert_eq!(output.warnings, vec!["No module found for 'libnope.dylib'.".to_string()]);
    assert!(output.output.contains(":3\n"));

    let options = SourceInfoOptions {
        name: Some("main".into()),
        shlibs: vec!["libnope.dylib".into()],
        ..Default::default()
    };
    let err = source_info(&fx.target, &options).unwrap_err();
    assert!(matches!(err, SalvageError::NoModules(_)));
    assert_eq!(err.to_string(), "No modules match the input.");
}

#[test]
fn test_info_needs_images_or_frame()
{
    let target = Target::new();
    let err = source_info(&target, &SourceInfoOptions::default()).unwrap_err();
    assert_eq!(err.to_string(), "The target has no associated executable images.");

    let fx = fixture();
    let err = source_info(&fx.target, &SourceInfoOptions::default()).unwrap_err();
    assert_eq!(err.to_string(), "No selected frame to use to find the default source.");
}

#[test]
fn test_info_option_validation()
{
    let fx = fixture();
    let reversed = SourceInfoOptions {
        file: Some("main.c".into()),
        start_line: Some(10),
        end_line: Some(5),
        ..Default::default()
    };
    assert!(matches!(source_info(&fx.target, &reversed), Err(SalvageError::InvalidArgument(_))));

    let two_selectors = SourceInfoOptions {
        name: Some("main".into()),
        address: Some(0x1000),
        ..Default::default()
    };
    assert!(matches!(source_info(&fx.target, &two_selectors), Err(SalvageError::InvalidArgument(_))));
}

#[test]
fn test_list_function_window()
{
    let mut fx = fixture();
    let options = SourceListOptions {
        name: Some("compute".into()),
        ..Default::default()
    };
    let output = source_list(&mut fx.target, &options).unwrap();
    assert_eq!(output.output, format!("File: {}\n{}", fx.source, listing(37..=46)));
}

#[test]
fn test_list_function_by_symbol()
{
    let mut fx = fixture();
    let options = SourceListOptions {
        name: Some("compute_entry".into()),
        ..Default::default()
    };
    let output = source_list(&mut fx.target, &options).unwrap();
    assert_eq!(count_headers(&output.output), 1);
    assert!(output.output.ends_with(&listing(46..=46)));
}

#[test]
fn test_list_inlined_copies_are_shown_once_per_location()
{
    let mut fx = fixture();
    let helper = SourceListOptions {
        name: Some("helper".into()),
        ..Default::default()
    };
    let output = source_list(&mut fx.target, &helper).unwrap();
    assert_eq!(count_headers(&output.output), 1);
    assert_eq!(output.output, format!("File: {}\n{}", fx.source, listing(15..=24)));

    let twin = SourceListOptions {
        name: Some("twin".into()),
        ..Default::default()
    };
    let output = source_list(&mut fx.target, &twin).unwrap();
    assert_eq!(count_headers(&output.output), 2);
    assert_eq!(
        output.output,
        format!("File: {src}\n{}File: {src}\n{}", listing(20..=29), listing(45..=54), src = fx.source)
    );
}

#[test]
fn test_list_unknown_function()
{
    let mut fx = fixture();
    let options = SourceListOptions {
        name: Some("nope".into()),
        ..Default::default()
    };
    let err = source_list(&mut fx.target, &options).unwrap_err();
    assert_eq!(err.to_string(), "Could not find function named: \"nope\".");
}

#[test]
fn test_list_address_marks_current_line()
{
    let mut fx = fixture();
    let options = SourceListOptions {
        address: Some(0x1014),
        count: Some(3),
        ..Default::default()
    };
    let output = source_list(&mut fx.target, &options).unwrap();
    assert_eq!(
        output.output,
        format!(
            "demo`compute + 16 at {}:44:5\n   43  \tline 43\n-> 44  \tline 44\n   45  \tline 45\n",
            fx.source
        )
    );
}

#[test]
fn test_list_file_with_breakpoint_counts()
{
    let mut fx = fixture();
    let options = SourceListOptions {
        file: Some("main.c".into()),
        line: Some(42),
        count: Some(3),
        show_breakpoints: true,
        ..Default::default()
    };
    let output = source_list(&mut fx.target, &options).unwrap();
    assert_eq!(
        output.output,
        "[1]    42  \tline 42\n       43  \tline 43\n[1]    44  \tline 44\n"
    );
}

#[test]
fn test_list_ambiguous_file()
{
    let dir = TempDir::new().unwrap();
    let first_dir = dir.path().join("a");
    let second_dir = dir.path().join("b");
    fs::create_dir_all(&first_dir).unwrap();
    fs::create_dir_all(&second_dir).unwrap();
    let first = write_source(&first_dir, "main.c", 60);
    let second = write_source(&second_dir, "main.c", 60);

    let mut target = Target::new();
    target.add_image(demo_module(&first));
    let other = Module::new(FileSpec::new("/bin/other"), Architecture::X86_64).with_compile_unit(CompileUnit::new(
        second.clone(),
        [],
        LineTable::new(vec![row(0x1000, 0x10, &second, 1, 0)]),
    ));
    target.add_image(other);

    let options = SourceListOptions {
        file: Some("main.c".into()),
        ..Default::default()
    };
    let err = source_list(&mut target, &options).unwrap_err();
    assert!(matches!(err, SalvageError::AmbiguousMatch(_)));
    assert_eq!(err.to_string(), "Multiple source files found matching: \"main.c\".");

    let options = SourceListOptions {
        file: Some(first.to_string()),
        count: Some(2),
        ..Default::default()
    };
    let output = source_list(&mut target, &options).unwrap();
    assert_eq!(output.output, listing(1..=2));
}

#[test]
fn test_bare_list_continues_and_reverses()
{
    let mut fx = fixture();
    let by_name = SourceListOptions {
        name: Some("compute".into()),
        ..Default::default()
    };
    source_list(&mut fx.target, &by_name).unwrap();

    let output = source_list(&mut fx.target, &SourceListOptions::default()).unwrap();
    assert_eq!(output.output, listing(47..=56));

    let reverse = SourceListOptions {
        reverse: true,
        ..Default::default()
    };
    let output = source_list(&mut fx.target, &reverse).unwrap();
    assert_eq!(output.output, listing(37..=46));
}

#[test]
fn test_bare_list_starts_at_main()
{
    let mut fx = fixture();
    let output = source_list(&mut fx.target, &SourceListOptions::default()).unwrap();
    assert_eq!(output.output, listing(3..=12));
}

#[test]
fn test_bare_list_without_anything_to_show()
{
    let mut target = Target::new();
    let err = source_list(&mut target, &SourceListOptions::default()).unwrap_err();
    assert_eq!(err.to_string(), "No source file to list; use --file or --name first.");
}

#[test]
fn test_list_option_validation()
{
    let mut fx = fixture();
    let cases = [
        SourceListOptions {
            reverse: true,
            file: Some("main.c".into()),
            ..Default::default()
        },
        SourceListOptions {
            line: Some(3),
            name: Some("main".into()),
            ..Default::default()
        },
        SourceListOptions {
            shlibs: vec!["demo".into()],
            ..Default::default()
        },
        SourceListOptions {
            count: Some(0),
            ..Default::default()
        },
    ];
    for options in &cases {
        assert!(matches!(
            source_list(&mut fx.target, options),
            Err(SalvageError::InvalidArgument(_))
        ));
    }
}

#[test]
fn test_repeat_command()
{
    assert_eq!(repeat_command(&["-r", "-c", "5"]), "source list -r");
    assert_eq!(repeat_command(&["--name", "main"]), "source list");
    assert_eq!(repeat_command::<&str>(&[]), "source list");
}
