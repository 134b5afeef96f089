mod common;

mod write {
    use crate::common;
    use crate::common::address;
    use flash_backlog::error::Error;
    use flash_backlog::{Log, SectorState};
    use pretty_assertions::assert_eq;

    fn record(seed: u8, size: usize) -> Vec<u8> {
        (0..size).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn records_read_back() {
        let mut flash = common::Flash::new(2);
        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();

        for i in 0..20u8 {
            assert_eq!(
                log.write_record(&record(i, 10)).unwrap(),
                address(0, i as u16)
            );
        }

        let mut buf = [0u8; 16];
        for i in 0..20u8 {
            assert_eq!(log.read_record(address(0, i as u16), &mut buf).unwrap(), 10);
            assert_eq!(&buf[..10], record(i, 10).as_slice());
        }
        assert_eq!(log.next_record_index(), 20);
    }

    #[test]
    fn fresh_partition_is_blank_until_first_write() {
        let mut flash = common::Flash::new(2);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            assert_eq!(log.current_sector_index(), 0);
            assert_eq!(log.next_record_index(), 0);
            assert_eq!(log.sector_info(0).unwrap().state, SectorState::Blank);
            assert_eq!(log.latest_written_record().unwrap(), None);

            log.write_record(&[0xAA; 10]).unwrap();

            let info = log.sector_info(0).unwrap();
            assert_eq!(info.state, SectorState::Active);
            assert_eq!(info.record_size, Some(10));
            assert_eq!(info.capacity, 399);
            assert_eq!(info.written, 1);
            assert_eq!(info.unsent, 1);
        }

        // capacity 399, little endian
        assert_eq!(flash.footer(0), [0x8F, 0x01, 10, 0xFF, 0xFE]);
        assert_eq!(flash.footer(1), [0xFF; 5]);
        assert_eq!(flash.erases(), 0);
    }

    #[test]
    fn full_sector_rolls_over_to_next() {
        let mut flash = common::Flash::new(2);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            for i in 0..399u16 {
                assert_eq!(log.write_record(&[i as u8; 10]).unwrap(), address(0, i));
            }

            // rollover happens eagerly once the last slot is taken
            assert_eq!(log.current_sector_index(), 1);
            assert_eq!(log.next_record_index(), 0);

            assert_eq!(log.write_record(&[0x55; 10]).unwrap(), address(1, 0));
            assert_eq!(log.sector_info(0).unwrap().state, SectorState::Inactive);
            assert_eq!(log.sector_info(1).unwrap().state, SectorState::Active);

            let mut buf = [0u8; 10];
            log.read_record(address(0, 398), &mut buf).unwrap();
            assert_eq!(buf, [(398u16 as u8); 10]);
        }

        // nothing was sent, so no summary on the deactivated sector
        assert_eq!(flash.footer(0), [0x8F, 0x01, 10, 0xFF, 0xEE]);
        assert_eq!(flash.footer(1), [0x8F, 0x01, 10, 0xFF, 0xFE]);
    }

    #[test]
    fn wraps_around_and_reuses_oldest_sector() {
        let mut flash = common::Flash::new(2);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            for i in 0..32u8 {
                log.write_record(&record(i, 254)).unwrap();
            }
            assert_eq!(log.current_sector_index(), 0);
            assert_eq!(log.next_record_index(), 0);

            assert_eq!(log.write_record(&record(100, 254)).unwrap(), address(0, 0));

            let mut buf = [0u8; 254];
            log.read_record(address(0, 0), &mut buf).unwrap();
            assert_eq!(buf.as_slice(), record(100, 254).as_slice());
            assert_eq!(
                log.read_record(address(0, 1), &mut buf),
                Err(Error::InvalidAddress)
            );

            log.read_record(address(1, 15), &mut buf).unwrap();
            assert_eq!(buf.as_slice(), record(31, 254).as_slice());
        }

        // second generation tag on sector 0
        assert_eq!(flash.footer(0), [16, 0, 254, 0xFF, 0xEC]);
        assert_eq!(flash.footer(1), [16, 0, 254, 0xFF, 0xEE]);
        assert_eq!(flash.erases(), 2);
    }

    #[test]
    fn record_size_change_starts_new_sector() {
        let mut flash = common::Flash::new(3);
        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();

        assert_eq!(log.write_record(&[1; 10]).unwrap(), address(0, 0));
        assert_eq!(log.write_record(&[2; 20]).unwrap(), address(1, 0));
        assert_eq!(log.write_record(&[3; 20]).unwrap(), address(1, 1));

        let mut buf = [0u8; 32];
        assert_eq!(log.read_record(address(0, 0), &mut buf).unwrap(), 10);
        assert_eq!(log.read_record(address(1, 1), &mut buf).unwrap(), 20);
        assert_eq!(&buf[..20], &[3; 20]);

        assert_eq!(log.sector_info(0).unwrap().state, SectorState::Inactive);
        assert_eq!(log.sector_info(1).unwrap().record_size, Some(20));
    }

    #[test]
    fn record_size_change_on_empty_sector_reactivates_in_place() {
        let mut flash = common::Flash::new(2);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            for i in 0..16u8 {
                log.write_record(&record(i, 254)).unwrap();
            }
            assert_eq!(log.current_sector_index(), 1);
            assert_eq!(log.next_record_index(), 0);

            assert_eq!(log.write_record(&[7; 8]).unwrap(), address(1, 0));

            let info = log.sector_info(1).unwrap();
            assert_eq!(info.state, SectorState::Active);
            assert_eq!(info.record_size, Some(8));
            assert_eq!(info.capacity, 495);
            assert_eq!(info.written, 1);
        }

        // the tag stays the same, no new generation
        assert_eq!(flash.footer(1)[4], 0xFE);
        // one erase for the rollover, one for the reactivation
        assert_eq!(flash.erases(), 2);
    }

    #[test]
    fn reopen_restores_write_position() {
        let mut flash = common::Flash::new(2);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            for i in 0..5u8 {
                log.write_record(&[i; 12]).unwrap();
            }
        }

        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
        assert_eq!(log.current_sector_index(), 0);
        assert_eq!(log.next_record_index(), 5);
        assert_eq!(log.latest_written_record().unwrap(), Some(address(0, 4)));
        assert_eq!(log.write_record(&[5; 12]).unwrap(), address(0, 5));
    }

    #[test]
    fn reopen_finds_active_sector_after_rollovers() {
        let mut flash = common::Flash::new(3);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            for i in 0..35u8 {
                log.write_record(&record(i, 254)).unwrap();
            }
        }

        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
        assert_eq!(log.current_sector_index(), 2);
        assert_eq!(log.next_record_index(), 3);

        let mut buf = [0u8; 254];
        log.read_record(address(2, 2), &mut buf).unwrap();
        assert_eq!(buf.as_slice(), record(34, 254).as_slice());
    }

    #[test]
    fn reopen_finds_active_sector_after_wrap() {
        let mut flash = common::Flash::new(4);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            for i in 0..80u8 {
                log.write_record(&record(i, 254)).unwrap();
            }
        }

        // sector 0 is in its second generation and already full
        assert_eq!(flash.footer(0)[4], 0xCC);
        assert_eq!(flash.footer(1)[4], 0xEC);
        assert_eq!(flash.footer(2)[4], 0xEE);

        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
        assert_eq!(log.current_sector_index(), 1);
        assert_eq!(log.next_record_index(), 0);
        assert_eq!(log.latest_written_record_sector().unwrap(), Some(0));
        assert_eq!(log.latest_written_record().unwrap(), Some(address(0, 15)));

        let mut buf = [0u8; 254];
        log.read_record(address(0, 15), &mut buf).unwrap();
        assert_eq!(buf.as_slice(), record(79, 254).as_slice());
    }

    #[test]
    fn reopen_across_tag_generations() {
        let mut flash = common::Flash::new(2);
        let mut written = 0u16;

        // 12 rollovers take both sectors through 0x00 and back to 0xFE
        for _ in 0..25 {
            {
                let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
                assert_eq!(log.current_sector_index(), (written / 16) % 2);
                assert_eq!(log.next_record_index(), written % 16);

                for _ in 0..8 {
                    log.write_record(&record(written as u8, 254)).unwrap();
                    written += 1;
                }
            }
        }

        assert_eq!(flash.footer(0)[4], 0xC8);
        assert_eq!(flash.footer(1)[4], 0xCC);

        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
        assert_eq!(log.current_sector_index(), 0);
        assert_eq!(log.next_record_index(), 8);
        assert_eq!(log.sector_info(0).unwrap().tag.epoch(), Some(4));
        assert_eq!(log.sector_info(1).unwrap().tag.epoch(), Some(3));

        let mut buf = [0u8; 254];
        log.read_record(address(0, 7), &mut buf).unwrap();
        assert_eq!(buf.as_slice(), record(199, 254).as_slice());
        log.read_record(address(1, 15), &mut buf).unwrap();
        assert_eq!(buf.as_slice(), record(191, 254).as_slice());
    }

    #[test]
    fn word_aligned_flash() {
        let mut flash = common::WordFlash::new(3);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            for i in 0..10u8 {
                log.write_record(&record(i, 3)).unwrap();
            }
            for i in 0..17u8 {
                log.write_record(&record(i, 254)).unwrap();
            }
        }

        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
        assert_eq!(log.current_sector_index(), 2);
        assert_eq!(log.next_record_index(), 1);

        let mut buf = [0u8; 254];
        for i in 0..10u8 {
            assert_eq!(log.read_record(address(0, i as u16), &mut buf).unwrap(), 3);
            assert_eq!(&buf[..3], record(i, 3).as_slice());
        }
        // the size change moved the large records to sector 1
        for i in 0..16u8 {
            assert_eq!(log.read_record(address(1, i as u16), &mut buf).unwrap(), 254);
            assert_eq!(buf.as_slice(), record(i, 254).as_slice());
        }
        log.read_record(address(2, 0), &mut buf).unwrap();
        assert_eq!(buf.as_slice(), record(16, 254).as_slice());
    }

    #[test]
    fn typed_records() {
        let mut flash = common::Flash::new(2);
        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();

        let first = log.append(&0xDEADBEEFu32).unwrap();
        let second = log.append(&-12345i32).unwrap();
        assert_eq!(log.get::<u32>(first).unwrap(), 0xDEADBEEF);
        assert_eq!(log.get::<i32>(second).unwrap(), -12345);
        assert_eq!(log.get::<u16>(first), Err(Error::RecordSizeMismatch(4)));

        let blob = log.append(&[0x42u8; 16]).unwrap();
        assert_eq!(blob, address(1, 0));
        assert_eq!(log.get::<[u8; 16]>(blob).unwrap(), [0x42; 16]);

        let mut buf = [0u8; 4];
        log.read_record(first, &mut buf).unwrap();
        assert_eq!(buf, 0xDEADBEEFu32.to_le_bytes());
    }

    #[test]
    fn read_records_back_to_back() {
        let mut flash = common::Flash::new(2);
        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();

        let addresses = [
            log.write_record(&[1, 2, 3, 4]).unwrap(),
            log.write_record(&[5, 6, 7, 8]).unwrap(),
            log.write_record(&[9, 10, 11, 12]).unwrap(),
        ];

        let mut buf = [0u8; 12];
        assert_eq!(log.read_records(&addresses, &mut buf).unwrap(), 12);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);

        let mut short = [0u8; 10];
        assert_eq!(
            log.read_records(&addresses, &mut short),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn invalid_arguments() {
        let mut flash = common::Flash::new(2);
        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();

        let mut buf = [0u8; 254];
        assert_eq!(
            log.read_record(address(0, 0), &mut buf),
            Err(Error::InvalidAddress)
        );

        assert_eq!(log.write_record(&[]), Err(Error::InvalidRecordSize));
        assert_eq!(log.write_record(&[0; 255]), Err(Error::InvalidRecordSize));

        log.write_record(&[0x11; 20]).unwrap();
        assert_eq!(
            log.read_record(address(0, 1), &mut buf),
            Err(Error::InvalidAddress)
        );
        assert_eq!(
            log.read_record(address(2, 0), &mut buf),
            Err(Error::InvalidAddress)
        );

        let mut small = [0xEEu8; 8];
        assert_eq!(
            log.read_record(address(0, 0), &mut small),
            Err(Error::BufferTooSmall)
        );
        assert_eq!(small, [0xEE; 8]);
    }

    #[test]
    fn partition_geometry() {
        let mut flash = common::Flash::new(4);
        let len = flash.len();

        assert!(matches!(
            Log::new(100, 2 * 4096, &mut flash),
            Err(Error::InvalidPartitionOffset)
        ));
        assert!(matches!(
            Log::new(0, 5000, &mut flash),
            Err(Error::InvalidPartitionSize)
        ));
        assert!(matches!(
            Log::new(0, 4096, &mut flash),
            Err(Error::InvalidPartitionSize)
        ));
        assert!(matches!(
            Log::new(4096, len, &mut flash),
            Err(Error::InvalidPartitionSize)
        ));

        // a partition that doesn't start at the beginning of the flash
        {
            let mut log = Log::new(2 * 4096, 2 * 4096, &mut flash).unwrap();
            assert_eq!(log.sector_count(), 2);
            assert_eq!(log.write_record(&[9; 10]).unwrap(), address(0, 0));
        }
        assert_eq!(flash.footer(0), [0xFF; 5]);
        assert_eq!(flash.footer(2), [0x8F, 0x01, 10, 0xFF, 0xFE]);
    }

    #[test]
    fn flash_error_is_sticky() {
        use flash_backlog::error::Error::FlashError;

        // open: 2 reads, first write: footer, record, position bit (read + write)
        let mut flash = common::Flash::new_with_fault(2, 6);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            assert_eq!(log.write_record(&[1; 10]).unwrap(), address(0, 0));

            assert_eq!(log.write_record(&[2; 10]), Err(FlashError));
            assert_eq!(log.write_record(&[2; 10]), Err(FlashError));
            assert_eq!(log.mark_record_sent(address(0, 0)), Err(FlashError));
            assert_eq!(log.statistics(), Err(FlashError));
        }

        flash.disable_faults();

        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
        assert_eq!(log.next_record_index(), 1);
        assert_eq!(log.write_record(&[3; 10]).unwrap(), address(0, 1));
    }

    #[test]
    fn verify_blank_and_erase_all() {
        let mut flash = common::Flash::new(2);

        {
            let mut log = Log::new(0, flash.len(), &mut flash).unwrap();
            assert!(log.verify_blank(0).unwrap());

            log.write_record(&[0; 10]).unwrap();
            assert!(!log.verify_blank(0).unwrap());
            assert!(log.verify_blank(1).unwrap());
            assert_eq!(log.verify_blank(2), Err(Error::InvalidAddress));

            log.erase_all().unwrap();
            assert!(log.verify_blank(0).unwrap());
            assert_eq!(log.next_record_index(), 0);
            assert_eq!(log.latest_written_record().unwrap(), None);
            assert_eq!(log.write_record(&[1; 10]).unwrap(), address(0, 0));
        }

        assert!(flash.operations.contains(&common::Operation::Erase {
            offset: 0,
            len: 2 * 4096,
        }));
    }

    #[test]
    fn sleep_and_wakeup_reach_the_flash() {
        let mut flash = common::Flash::new(2);
        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();

        log.sleep();
        log.wakeup();
        log.write_record(&[0; 10]).unwrap();

        log.sleep();
        let flash = log.into_inner();
        assert!(flash.asleep);
    }
}

mod statistics {
    use crate::common;
    use crate::common::address;
    use flash_backlog::{Log, LogStatistics, RecordStatistics, SectorStatistics};
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_partition() {
        let mut flash = common::Flash::new(3);
        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();

        assert_eq!(
            log.statistics().unwrap(),
            LogStatistics {
                sectors: SectorStatistics {
                    blank: 3,
                    active: 0,
                    inactive: 0,
                    flushed: 0,
                    corrupted: 0,
                },
                records: RecordStatistics {
                    written: 0,
                    sent: 0,
                    unsent: 0,
                },
            }
        );
    }

    #[test]
    fn counts_records_and_sectors() {
        let mut flash = common::Flash::new(3);
        let mut log = Log::new(0, flash.len(), &mut flash).unwrap();

        for i in 0..18u8 {
            log.write_record(&[i; 254]).unwrap();
        }
        for i in 0..16 {
            log.mark_record_sent(address(0, i)).unwrap();
        }
        log.mark_record_sent(address(1, 0)).unwrap();

        assert_eq!(
            log.statistics().unwrap(),
            LogStatistics {
                sectors: SectorStatistics {
                    blank: 1,
                    active: 1,
                    inactive: 1,
                    flushed: 1,
                    corrupted: 0,
                },
                records: RecordStatistics {
                    written: 18,
                    sent: 17,
                    unsent: 1,
                },
            }
        );
    }
}
