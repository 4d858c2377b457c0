//! Tests for error handling

use std::io;

use salvage_core::error::{SalvageError, SalvageResult};

#[test]
fn test_address_not_mapped_display()
{
    let error = SalvageError::AddressNotMapped(0x5000);
    assert_eq!(error.to_string(), "address 0x5000 is not mapped in the core file");
}

#[test]
fn test_lookup_errors_print_message_verbatim()
{
    let error = SalvageError::NotFound("Could not find function named 'nope'.".to_string());
    assert_eq!(error.to_string(), "Could not find function named 'nope'.");

    let error = SalvageError::AmbiguousMatch("Multiple source files found matching: \"main.c\".".to_string());
    assert!(error.to_string().starts_with("Multiple source files"));
}

#[test]
fn test_invalid_argument()
{
    let error = SalvageError::InvalidArgument("invalid line count: '0'".to_string());
    let message = error.to_string();
    assert!(message.contains("Invalid argument"));
    assert!(message.contains("'0'"));
}

#[test]
fn test_invalid_container()
{
    let error = SalvageError::InvalidContainer("core file has no sections".to_string());
    assert!(error.to_string().contains("no sections"));
}

#[test]
fn test_io_error_conversion()
{
    fn open() -> SalvageResult<()>
    {
        Err(io::Error::new(io::ErrorKind::NotFound, "missing.core"))?;
        Ok(())
    }

    let error = open().unwrap_err();
    assert!(matches!(error, SalvageError::Io(_)));
    assert!(error.to_string().contains("missing.core"));
}

#[test]
fn test_result_type()
{
    let _result: SalvageResult<()> = Ok(());
    let _error_result: SalvageResult<()> = Err(SalvageError::NoTarget);
}
